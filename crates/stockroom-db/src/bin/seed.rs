//! # Seed Data Generator
//!
//! Populates a local database with equipment, staff and a few open checkouts
//! for development.
//!
//! ## Usage
//! ```bash
//! # 200 items, 20 staff (default)
//! cargo run -p stockroom-db --bin seed
//!
//! # Custom amounts and path
//! cargo run -p stockroom-db --bin seed -- --items 1000 --staff 50 --db ./data/stockroom.db
//!
//! # Queue everything for upload instead of seeding the cache as already synced
//! cargo run -p stockroom-db --bin seed -- --queue
//! ```

use std::env;
use stockroom_core::{timestamp_now, CheckoutLog, Entity, EntityKind, Item, OperationType, Staff};
use stockroom_db::{Database, DbConfig};

/// Equipment categories and base names.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Audio",
        &["Wireless Mic", "Mixer", "PA Speaker", "Headphones", "DI Box"],
    ),
    (
        "Video",
        &["Camera Body", "Tripod", "Projector", "HDMI Switcher", "Monitor"],
    ),
    (
        "Lighting",
        &["LED Panel", "Fresnel", "Light Stand", "DMX Controller", "Gel Pack"],
    ),
    (
        "Tools",
        &["Cordless Drill", "Ladder", "Multimeter", "Soldering Iron", "Tape Measure"],
    ),
];

const DEPARTMENTS: &[&str] = &["Production", "Facilities", "Events", "IT"];

const FIRST_NAMES: &[&str] = &["Ana", "Ben", "Chen", "Dara", "Eli", "Fatima", "Gus", "Hana"];

const CONDITIONS: &[&str] = &["good", "good", "good", "worn", "needs repair"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut item_count: usize = 200;
    let mut staff_count: usize = 20;
    let mut db_path = String::from("./stockroom_dev.db");
    let mut queue = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--items" | "-i" => {
                if i + 1 < args.len() {
                    item_count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--staff" | "-s" => {
                if i + 1 < args.len() {
                    staff_count = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--queue" | "-q" => queue = true,
            "--help" | "-h" => {
                println!("Stockroom Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -i, --items <N>    Number of items to generate (default: 200)");
                println!("  -s, --staff <N>    Number of staff to generate (default: 20)");
                println!("  -d, --db <PATH>    Database file path (default: ./stockroom_dev.db)");
                println!("  -q, --queue        Record as local mutations (queued for sync)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Stockroom Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!("Items:    {}", item_count);
    println!("Staff:    {}", staff_count);
    println!("Mode:     {}", if queue { "queued" } else { "cache only" });
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.entities().count(EntityKind::Item).await?;
    if existing > 0 {
        println!("⚠ Database already has {} items", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let now = timestamp_now();

    let items: Vec<Item> = (0..item_count).map(|seed| generate_item(seed, now)).collect();
    let staff: Vec<Staff> = (0..staff_count).map(|seed| generate_staff(seed, now)).collect();

    // Every tenth item is out with someone.
    let logs: Vec<CheckoutLog> = if staff.is_empty() {
        Vec::new()
    } else {
        items
            .iter()
            .step_by(10)
            .enumerate()
            .map(|(n, item)| CheckoutLog::open(&item.id, &staff[n % staff.len()].id, now))
            .collect()
    };

    let entities = items
        .into_iter()
        .map(Entity::from)
        .chain(staff.into_iter().map(Entity::from))
        .chain(logs.into_iter().map(Entity::from));

    let mut written = 0;
    for entity in entities {
        let result = if queue {
            db.record_local_mutation(OperationType::Create, &entity, now)
                .await
                .map(|_| ())
        } else {
            db.entities().put(&entity).await.map(|_| ())
        };

        if let Err(e) = result {
            eprintln!("Failed to write {} {}: {}", entity.kind(), entity.id(), e);
            continue;
        }

        written += 1;
        if written % 100 == 0 {
            println!("  Wrote {} records...", written);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Wrote {} records in {:?}", written, elapsed);
    for kind in EntityKind::ALL {
        println!("  {:<13} {}", kind.as_str(), db.entities().count(kind).await?);
    }
    println!(
        "  pending ops   {}",
        db.pending_operations().count().await?
    );

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates one item with deterministic, realistic fields.
fn generate_item(seed: usize, now: i64) -> Item {
    let (category, names) = CATEGORIES[seed % CATEGORIES.len()];
    let name = names[(seed / CATEGORIES.len()) % names.len()];

    let mut item = Item::new(format!("{} #{:03}", name, seed + 1), now);
    item.category = Some(category.to_string());
    item.barcode = Some(format!("200{:010}", seed));
    item.condition = Some(CONDITIONS[seed % CONDITIONS.len()].to_string());
    item
}

fn generate_staff(seed: usize, now: i64) -> Staff {
    let first = FIRST_NAMES[seed % FIRST_NAMES.len()];
    let department = DEPARTMENTS[seed % DEPARTMENTS.len()];

    let mut staff = Staff::new(format!("{} {}", first, seed + 1), department, now);
    staff.email = Some(format!("{}{}@stockroom.local", first.to_lowercase(), seed + 1));
    staff
}
