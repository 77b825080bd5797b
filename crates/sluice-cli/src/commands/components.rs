//! List registered components

use crate::error::{CliError, Result};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use sluice_common::ParamSpec;
use sluice_components::builtin_registry;
use sluice_engine::registry::ComponentDescriptor;
use sluice_engine::ComponentKind;

/// Print the component catalog, optionally restricted to one kind
pub fn run(kind: Option<&str>) -> Result<()> {
    let kinds = match kind {
        Some(k) => vec![k
            .parse::<ComponentKind>()
            .map_err(CliError::invalid_argument)?],
        None => ComponentKind::ALL.to_vec(),
    };

    let registry = builtin_registry()?;
    let descriptors: Vec<ComponentDescriptor> = kinds
        .into_iter()
        .flat_map(|kind| registry.describe(kind))
        .collect();

    println!("{}", "Registered components".cyan().bold());
    print!("{}", format_as_table(&descriptors));
    Ok(())
}

/// Format descriptors as table
fn format_as_table(descriptors: &[ComponentDescriptor]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Kind", "Name", "Datasource", "Parameters"]);

    for d in descriptors {
        table.add_row(vec![
            d.kind.to_string(),
            d.name.clone(),
            d.datasource.clone().unwrap_or_else(|| "-".to_string()),
            format_params(&d.params),
        ]);
    }

    format!("{}\n", table)
}

/// `key*` for required parameters, `key=default` when a default exists
fn format_params(params: &[ParamSpec]) -> String {
    params
        .iter()
        .map(|p| {
            if p.required {
                format!("{}*", p.key)
            } else if p.default_value.is_empty() {
                p.key.clone()
            } else {
                format!("{}={}", p.key, p.default_value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
