use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use eidetic::EideticCache;
use eidetic::consolidation::{CycleOutcome, CycleReport, CycleType};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp};

#[derive(Parser)]
pub struct ConsolidateCommand {
    #[clap(help = "Cycle to run (fast, slow). Defaults to both.")]
    pub cycle: Option<String>,

    #[clap(long, short, help = "Run even if the cycle is not due")]
    pub force: bool,
}

impl ConsolidateCommand {
    pub fn cycles(&self) -> CliResult<Vec<CycleType>> {
        match self.cycle.as_deref() {
            Some(cycle) => Ok(vec![cycle.parse::<CycleType>()?]),
            None => Ok(CycleType::ALL.to_vec()),
        }
    }

    pub async fn execute(&self, cache: &EideticCache, format: OutputFormat) -> CliResult<()> {
        let mut outcomes = Vec::new();
        for cycle in self.cycles()? {
            outcomes.push((cycle, cache.run_cycle(cycle, self.force).await));
        }

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = outcomes.iter().map(|(_, outcome)| outcome).collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header([
                        "Cycle",
                        "Examined",
                        "Decayed",
                        "Promoted",
                        "Demoted",
                        "Associations",
                        "Status",
                    ]);

                for (cycle, outcome) in &outcomes {
                    match outcome {
                        CycleOutcome::NotDue { next_due } => {
                            table.add_row([
                                cycle.to_string(),
                                "-".to_string(),
                                "-".to_string(),
                                "-".to_string(),
                                "-".to_string(),
                                "-".to_string(),
                                format!("not due until {}", format_timestamp(next_due)),
                            ]);
                        }
                        CycleOutcome::Completed(report) => {
                            table.add_row([
                                cycle.to_string(),
                                report.examined.to_string(),
                                report.decayed.to_string(),
                                report.promoted.to_string(),
                                report.demoted.to_string(),
                                report.associations.to_string(),
                                status(report),
                            ]);
                        }
                    }
                }

                println!("{table}");

                for (_, outcome) in &outcomes {
                    if let CycleOutcome::Completed(report) = outcome {
                        for error in &report.errors {
                            println!("Error ({}): {error}", report.cycle);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn status(report: &CycleReport) -> String {
    if report.complete {
        "complete".to_string()
    } else {
        format!("{} batches skipped", report.timed_out_batches)
    }
}
