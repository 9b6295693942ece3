use clap::Parser;
use eidetic::EideticCache;
use eidetic::memory::types::{StoreContext, Urgency, Warning};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_tiers};

#[derive(Parser)]
pub struct StoreCommand {
    #[clap(help = "Content to remember")]
    pub content: String,

    #[clap(
        long,
        short,
        default_value = "semantic",
        help = "Content type (semantic, procedural, priority, working, mixed)"
    )]
    pub r#type: String,

    #[clap(long, short, help = "Urgency (low, normal, high, critical)")]
    pub urgency: Option<String>,

    #[clap(long, help = "Declared priority between 0 and 1")]
    pub priority: Option<f32>,

    #[clap(long, help = "Declared importance between 0 and 1")]
    pub importance: Option<f32>,

    #[clap(long, help = "Where the content came from")]
    pub source: Option<String>,

    #[clap(long = "flag", help = "Extra context flag as key=value (repeatable)")]
    pub flags: Vec<String>,
}

impl StoreCommand {
    pub fn context(&self) -> CliResult<StoreContext> {
        let mut context = StoreContext::new();
        if let Some(ref urgency) = self.urgency {
            context = context.with_urgency(urgency.parse::<Urgency>()?);
        }
        if let Some(priority) = self.priority {
            context = context.with_priority(priority);
        }
        if let Some(importance) = self.importance {
            context = context.with_importance(importance);
        }
        if let Some(ref source) = self.source {
            context = context.with_source(source.clone());
        }
        for flag in &self.flags {
            let (key, value) = flag
                .split_once('=')
                .ok_or_else(|| format!("Invalid flag {flag}: expected key=value"))?;
            context = context.with_flag(key.trim(), value.trim());
        }
        Ok(context)
    }

    pub async fn execute(&self, cache: &EideticCache, format: OutputFormat) -> CliResult<()> {
        let receipt = cache.store(&self.content, &self.r#type, self.context()?).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            }
            OutputFormat::Table => {
                println!("Stored {}", receipt.id);
                println!("  Weight: {:.3}", receipt.weight);
                println!("  Tiers:  {}", format_tiers(&receipt.tiers));
                println!("  Write:  {:?}{}", receipt.strategy, if receipt.fallback { " (fallback)" } else { "" });
                for warning in &receipt.warnings {
                    println!("  Warning: {}", describe_warning(warning));
                }
            }
        }

        Ok(())
    }
}

pub(crate) fn describe_warning(warning: &Warning) -> String {
    match warning {
        Warning::PartialFailure { failed } => {
            let tiers: Vec<String> = failed.iter().map(|(t, reason)| format!("{t} ({reason})")).collect();
            format!("partial failure: {}", tiers.join(", "))
        }
        Warning::TierUnavailable { tier, reason } => format!("tier {tier} unavailable: {reason}"),
        Warning::DeadlineExceeded { tier } => format!("tier {tier} missed the deadline"),
    }
}
