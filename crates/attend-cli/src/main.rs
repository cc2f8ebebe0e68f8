use anyhow::{Context, Result};
use attend_core::record::DATE_FORMAT;
use attend_core::{AttendanceRecord, Config, Coordinate};
use attend_store::{AttendanceLedger, CredentialStore, SqliteCredentialStore, SqliteLedger};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "attendctl", about = "Inspect the attendance service's users and ledger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled users
    Users,
    /// Print the attendance ledger
    Ledger {
        /// Only rows for this date (YYYY-MM-DD)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Emit CSV instead of an aligned table
        #[arg(long)]
        csv: bool,
    },
    /// Check a position against the configured geofence
    Locate {
        #[arg(allow_hyphen_values = true)]
        latitude: String,
        #[arg(allow_hyphen_values = true)]
        longitude: String,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Users => {
            let store = SqliteCredentialStore::open(&config.users_db)
                .await
                .with_context(|| format!("opening {}", config.users_db.display()))?;
            let users = store.load().await?;
            if users.is_empty() {
                println!("No users enrolled");
                return Ok(());
            }
            println!("{:<20} {:<16} {:<26} {:>4}", "ID", "DOMAIN", "CREATED", "DIM");
            for user in users.values() {
                println!(
                    "{:<20} {:<16} {:<26} {:>4}",
                    user.id,
                    user.domain,
                    user.created_at.format("%Y-%m-%d %H:%M:%S %z"),
                    user.embedding.len()
                );
            }
        }
        Commands::Ledger { date, csv } => {
            let ledger = SqliteLedger::open(&config.ledger_db)
                .await
                .with_context(|| format!("opening {}", config.ledger_db.display()))?;
            let rows = match date {
                Some(d) => ledger.rows_on(d).await?,
                None => ledger.rows().await?,
            };
            if csv {
                print!("{}", to_csv(&rows));
            } else if rows.is_empty() {
                println!("No attendance recorded");
            } else {
                println!("{:<10} {:<8} {:<20} {:<16} STATUS", "DATE", "TIME", "ID", "DOMAIN");
                for row in &rows {
                    println!(
                        "{:<10} {:<8} {:<20} {:<16} {}",
                        row.date_string(),
                        row.time_string(),
                        row.id,
                        row.domain,
                        row.status
                    );
                }
            }
        }
        Commands::Locate {
            latitude,
            longitude,
        } => {
            let fence = config.geofence();
            let lat = Coordinate::from(latitude.as_str());
            let lon = Coordinate::from(longitude.as_str());
            match fence.distance_to(&lat, &lon) {
                Some(distance) => {
                    let inside = fence.within_allowed_area(&lat, &lon);
                    println!(
                        "{distance:.1} m from centre (radius {:.1} m): {}",
                        fence.radius_m,
                        if inside { "inside" } else { "outside" }
                    );
                }
                None => println!("invalid coordinates: outside"),
            }
        }
    }

    Ok(())
}

fn to_csv(rows: &[AttendanceRecord]) -> String {
    let mut out = String::from("date,time,id,domain,status\n");
    for row in rows {
        let fields = [
            row.date_string(),
            row.time_string(),
            csv_field(&row.id),
            csv_field(&row.domain),
            row.status.to_string(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
