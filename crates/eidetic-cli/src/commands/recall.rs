use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use eidetic::memory::types::TierId;
use eidetic::{EideticCache, RecallRequest};

use crate::commands::store::describe_warning;
use crate::error::CliResult;
use crate::output::{OutputFormat, format_tiers, truncate_string};

#[derive(Parser)]
pub struct RecallCommand {
    #[clap(help = "Query text")]
    pub query: String,

    #[clap(long, short = 'w', help = "Minimum weight between 0 and 1 (default 0.5)")]
    pub min_weight: Option<f32>,

    #[clap(long, short, help = "Maximum results (default 10, at most 50)")]
    pub limit: Option<usize>,

    #[clap(
        long,
        short,
        value_delimiter = ',',
        help = "Only search these tiers (working, semantic, procedural, priority)"
    )]
    pub tier: Vec<String>,
}

impl RecallCommand {
    pub fn request(&self) -> CliResult<RecallRequest> {
        let mut request = RecallRequest::new(self.query.clone());
        if let Some(min_weight) = self.min_weight {
            request = request.with_min_weight(min_weight);
        }
        if let Some(limit) = self.limit {
            request = request.with_max_results(limit);
        }
        if !self.tier.is_empty() {
            let tiers = self
                .tier
                .iter()
                .map(|t| t.parse::<TierId>())
                .collect::<Result<Vec<_>, _>>()?;
            request = request.with_tiers(tiers);
        }
        Ok(request)
    }

    pub async fn execute(&self, cache: &EideticCache, format: OutputFormat) -> CliResult<()> {
        let response = cache.recall(self.request()?).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
            OutputFormat::Table => {
                for warning in &response.warnings {
                    println!("Warning: {}", describe_warning(warning));
                }

                if response.results.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Score", "Weight", "Rank", "Tiers"]);

                for result in &response.results {
                    table.add_row([
                        truncate_string(&result.id.to_string(), 8),
                        truncate_string(&result.content, 50),
                        format!("{:.2}", result.score),
                        format!("{:.2}", result.weight),
                        format!("{:.3}", result.rank_score),
                        format_tiers(&result.tiers),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", response.results.len());
                if !response.cross_tier.is_empty() {
                    println!("Confirmed across tiers: {}", response.cross_tier.len());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[clap(flatten)]
        command: RecallCommand,
    }

    #[test]
    fn builds_request() {
        let harness = Harness::try_parse_from([
            "recall",
            "capital of France",
            "-w",
            "0.2",
            "--tier",
            "working,semantic",
        ])
        .unwrap();

        let request = harness.command.request().unwrap();
        assert_eq!(request.query, "capital of France");
        assert_eq!(request.min_weight, Some(0.2));
        assert_eq!(request.max_results, None);
        assert_eq!(request.tier_filter, Some(vec![TierId::Working, TierId::Semantic]));
    }

    #[test]
    fn rejects_unknown_tier() {
        let harness = Harness::try_parse_from(["recall", "x", "--tier", "cold"]).unwrap();
        assert!(harness.command.request().is_err());
    }
}
