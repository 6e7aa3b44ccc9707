//! Benchmarks for rule parsing and audience evaluation.
//! Run with: cargo bench -p campaign-segmentation

use campaign_core::types::{Customer, CustomerStatus};
use campaign_segmentation::{parse, AudienceResolver};
use chrono::Utc;
use uuid::Uuid;

const RULE: &str = "(spend > 10000 AND visits < 3) OR NOT (status == Inactive OR visits >= 40)";

fn create_customers(n: usize) -> Vec<Customer> {
    let now = Utc::now();
    (0..n)
        .map(|i| Customer {
            id: Uuid::new_v4(),
            name: format!("bench-{i}"),
            email: format!("bench-{i}@example.com"),
            spend: (i * 37 % 25_000) as f64,
            visits: (i % 50) as u32,
            status: if i % 7 == 0 {
                CustomerStatus::Inactive
            } else {
                CustomerStatus::Active
            },
            created_at: now,
            updated_at: now,
        })
        .collect()
}

fn main() {
    let customers = create_customers(100_000);

    let iterations = 10_000;
    let start = std::time::Instant::now();
    for _ in 0..iterations {
        let _ = parse(RULE).expect("benchmark rule parses");
    }
    let parse_elapsed = start.elapsed();

    let rule = parse(RULE).expect("benchmark rule parses");
    let start = std::time::Instant::now();
    let matched = customers
        .iter()
        .filter(|c| AudienceResolver::is_member(&rule, c))
        .count();
    let eval_elapsed = start.elapsed();

    println!("=== Rule Benchmark ===");
    println!("Parse per call:    {:?}", parse_elapsed / iterations);
    println!("Customers:         {}", customers.len());
    println!("Matched:           {}", matched);
    println!("Evaluation total:  {:?}", eval_elapsed);
    println!(
        "Throughput:        {:.0} evaluations/sec",
        customers.len() as f64 / eval_elapsed.as_secs_f64()
    );
}
