//! Campaign messages: canned suggestions per objective and a small
//! `{{variable}}` template renderer for personalizing them.

use std::fmt;

use campaign_core::types::Customer;
use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};

/// Placeholders a message body may use.
pub const TEMPLATE_VARIABLES: &[&str] = &["name", "email"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignObjective {
    Promotion,
    Loyalty,
    WinBack,
}

impl CampaignObjective {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignObjective::Promotion => "promotion",
            CampaignObjective::Loyalty => "loyalty",
            CampaignObjective::WinBack => "win_back",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "promotion" => Some(CampaignObjective::Promotion),
            "loyalty" => Some(CampaignObjective::Loyalty),
            "win_back" | "winback" => Some(CampaignObjective::WinBack),
            _ => None,
        }
    }
}

impl fmt::Display for CampaignObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggested message bodies for an objective, best fit first. Fixed text,
/// so the same objective always yields the same list.
pub fn suggest_messages(objective: CampaignObjective) -> &'static [&'static str] {
    match objective {
        CampaignObjective::Promotion => &[
            "Get 20% off your next purchase!",
            "Hi {{name}}, a limited-time offer is waiting for you.",
            "Thank you for being with us. Enjoy this exclusive deal!",
        ],
        CampaignObjective::Loyalty => &[
            "We appreciate your loyalty, here's something special!",
            "Thank you for being with us. Enjoy this exclusive deal!",
            "{{name}}, you're one of our best customers. Enjoy early access.",
        ],
        CampaignObjective::WinBack => &[
            "We miss you, {{name}}! Come back for 20% off your next purchase.",
            "Get 20% off your next purchase!",
            "It's been a while. Here's something special to welcome you back.",
        ],
    }
}

/// A message body with `{{variable}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageTemplate {
    body: String,
}

impl MessageTemplate {
    /// Rejects empty bodies, unterminated placeholders, and placeholders
    /// outside [`TEMPLATE_VARIABLES`].
    pub fn new(body: &str) -> CampaignResult<Self> {
        let body = body.trim();
        if body.is_empty() {
            return Err(CampaignError::Validation("message body is empty".into()));
        }
        for name in placeholders(body)? {
            if !TEMPLATE_VARIABLES.contains(&name) {
                return Err(CampaignError::Validation(format!(
                    "unknown message variable '{{{{{}}}}}'",
                    name
                )));
            }
        }
        Ok(Self {
            body: body.to_string(),
        })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Fill in the customer's fields.
    pub fn render(&self, customer: &Customer) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    out.push_str(match after[..end].trim() {
                        "name" => customer.name.as_str(),
                        "email" => customer.email.as_str(),
                        _ => "",
                    });
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl TryFrom<String> for MessageTemplate {
    type Error = CampaignError;

    fn try_from(body: String) -> Result<Self, Self::Error> {
        MessageTemplate::new(&body)
    }
}

impl From<MessageTemplate> for String {
    fn from(template: MessageTemplate) -> Self {
        template.body
    }
}

fn placeholders(body: &str) -> CampaignResult<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            CampaignError::Validation("unterminated '{{' in message body".into())
        })?;
        names.push(after[..end].trim());
        rest = &after[end + 2..];
    }
    Ok(names)
}
