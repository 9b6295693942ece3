use clap::Parser;
use eidetic::EideticCache;
use uuid::Uuid;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_tiers};

#[derive(Parser)]
pub struct ShowCommand {
    #[clap(help = "Record ID (UUID format)")]
    pub id: String,
}

impl ShowCommand {
    pub async fn execute(&self, cache: &EideticCache, format: OutputFormat) -> CliResult<()> {
        let id = Uuid::parse_str(&self.id).map_err(|e| format!("Invalid UUID format: {e}"))?;

        let record = cache
            .get(id)
            .ok_or_else(|| format!("Memory not found: {}", self.id))?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            OutputFormat::Table => {
                let band = cache.config().bands.categorize(record.weight);

                println!("ID:            {}", record.id);
                println!("Type:          {}", record.content_type);
                println!("Weight:        {:.4} ({})", record.weight, band.as_str());
                println!("Importance:    {:.2}", record.importance_score);
                println!("Emotional:     {:.2}", record.emotional_weight);
                println!("Access count:  {}", record.access_count);
                println!("Tiers:         {}", format_tiers(&record.tier_assignments));
                println!("Created:       {}", record.created_at.to_rfc3339());
                println!("Last accessed: {}", record.last_accessed_at.to_rfc3339());
                if let Some(decayed) = record.last_decayed_at {
                    println!("Last decayed:  {}", decayed.to_rfc3339());
                }
                if let Some(ref source) = record.context.source {
                    println!("Source:        {source}");
                }

                if !record.associations.is_empty() {
                    let mut associations: Vec<_> = record.associations.iter().collect();
                    associations.sort_by(|a, b| b.1.total_cmp(a.1).then(a.0.cmp(b.0)));
                    println!("\nAssociations:");
                    for (other, strength) in associations {
                        println!("  {other}  {strength:.2}");
                    }
                }

                println!("\nContent:\n{}", record.content);
            }
        }

        Ok(())
    }
}
