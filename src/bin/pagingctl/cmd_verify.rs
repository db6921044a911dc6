use anyhow::{anyhow, Result};
use std::path::PathBuf;

use broker_paging::inspect;

use crate::util::open_shared;

pub fn exec(dir: PathBuf, json: bool) -> Result<()> {
    let _lock = open_shared(&dir)?;
    let report = inspect::verify(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "verify: {} store(s), {} page(s), {} record(s)",
            report.stores, report.pages, report.records
        );
        for t in &report.torn_tails {
            println!("  torn tail: {}", t);
        }
        for c in &report.corrupt {
            println!("  CORRUPT: {}", c);
        }
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(anyhow!("{} corrupt page(s)", report.corrupt.len()))
    }
}
