use crate::config::Config;
use schemars::schema_for;

/// JSON Schema of `tripintel.yaml`
pub fn config_schema() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&schema_for!(Config))
}

pub fn execute() -> anyhow::Result<()> {
    println!("{}", config_schema()?);
    Ok(())
}
