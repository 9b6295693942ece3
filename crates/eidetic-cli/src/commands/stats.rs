use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use eidetic::EideticCache;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Include per-tier health")]
    pub health: bool,
}

impl StatsCommand {
    pub async fn execute(&self, cache: &EideticCache, format: OutputFormat) -> CliResult<()> {
        let stats = cache.stats();

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            OutputFormat::Table => {
                println!("Eidetic Statistics");
                println!("==================\n");

                let mut bands = Table::new();
                bands
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Band", "Count"]);
                for (band, count) in stats.bands.iter().rev() {
                    bands.add_row([band.as_str().to_string(), count.to_string()]);
                }
                println!("{bands}\n");

                let mut tiers = Table::new();
                tiers
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic);
                if self.health {
                    tiers.set_header(["Tier", "Records", "Successes", "Failures", "Last Error"]);
                } else {
                    tiers.set_header(["Tier", "Records"]);
                }
                for (tier, count) in &stats.tier_counts {
                    let mut row = vec![tier.to_string(), count.to_string()];
                    if self.health {
                        let health = stats.tiers.get(tier).cloned().unwrap_or_default();
                        row.push(health.successes.to_string());
                        row.push(health.failures.to_string());
                        row.push(
                            health
                                .last_error
                                .map(|e| truncate_string(&e, 40))
                                .unwrap_or_else(|| "-".to_string()),
                        );
                    }
                    tiers.add_row(row);
                }
                println!("{tiers}\n");

                for (cycle, status) in &stats.cycles {
                    let last = status
                        .last_completed_at
                        .as_ref()
                        .map(format_timestamp)
                        .unwrap_or_else(|| "never".to_string());
                    println!("{cycle} cycle: last run {last}, {} runs", status.runs);
                }

                let cache_stats = stats.routing.cache;
                println!(
                    "Routing: {} decisions, {} fallbacks, cache hit rate {:.1}%",
                    stats.routing.decisions,
                    stats.routing.fallbacks,
                    cache_stats.hit_rate() * 100.0
                );
                println!("\nTotal: {} memories", stats.records);
            }
        }

        Ok(())
    }
}
