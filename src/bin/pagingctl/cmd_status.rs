use anyhow::Result;
use std::path::PathBuf;

use broker_paging::inspect;

use crate::util::open_shared;

pub fn exec(dir: PathBuf, json: bool) -> Result<()> {
    let _lock = open_shared(&dir)?;
    let stores = inspect::status(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stores)?);
        return Ok(());
    }

    println!("Paging directory: {}", dir.display());
    println!("  stores = {}", stores.len());
    let mut total = 0u64;
    for s in &stores {
        println!("address '{}'", s.address);
        if let Some(id) = s.store_id {
            println!("  store_id       = {:#018x}", id);
        }
        if let Some(err) = &s.error {
            println!("  error          = {}", err);
            continue;
        }
        println!("  pages          = {}", s.pages.len());
        println!("  unacked msgs   = {}", s.unacked_messages);
        println!("  unacked bytes  = {}", s.unacked_bytes);
        total += s.unacked_bytes;
        for p in &s.pages {
            let mut line = format!(
                "    page {:>10}: {} msg(s), {} acked, {} bytes{}",
                p.seq,
                p.messages,
                p.acked,
                p.file_bytes,
                if p.sealed { ", sealed" } else { "" }
            );
            if let Some(at) = p.torn_tail {
                line.push_str(&format!(", torn tail at {}", at));
            }
            println!("{}", line);
        }
    }
    println!("total unacked bytes = {}", total);
    Ok(())
}
