use std::path::Path;

use anyhow::Context;
use cfdeploy_state::{AppRecord, StateStore};

pub fn show(state: &Path, address: Option<&str>, format: &str) -> anyhow::Result<()> {
    let store = StateStore::open(state)?;
    let records = match address {
        Some(address) => vec![
            store
                .get_record(address)?
                .with_context(|| format!("no record for {address}"))?,
        ],
        None => store.list_records()?,
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in &records {
        print!("{}", format_record(record));
    }
    if records.is_empty() {
        println!("no recorded applications");
    }
    Ok(())
}

pub fn list_deposed(state: &Path) -> anyhow::Result<()> {
    let store = StateStore::open(state)?;
    let mut found = 0;
    for record in store.list_records()? {
        for (id, kind) in record.deposed.iter() {
            println!("{}\t{kind}\t{id}", record.address);
            found += 1;
        }
    }
    if found == 0 {
        println!("no deposed resources");
    }
    Ok(())
}

fn format_record(record: &AppRecord) -> String {
    let mut out = format!(
        "{}\n  app:       {} ({})\n  state:     {:?}, {} instance(s)\n",
        record.address, record.app.name, record.id, record.app.state, record.app.instances
    );
    for route in &record.routes {
        out.push_str(&format!(
            "  route:     {} -> {}\n",
            route.route,
            route.mapping_id.as_deref().unwrap_or("unmapped")
        ));
    }
    for binding in &record.service_bindings {
        out.push_str(&format!(
            "  binding:   {} ({} credential key(s))\n",
            binding.service_instance,
            binding.credentials.len()
        ));
    }
    if !record.deposed.is_empty() {
        out.push_str(&format!("  deposed:   {}\n", record.deposed.len()));
    }
    out
}
