use anyhow::Result;
use std::path::PathBuf;

use base64::Engine;
use broker_paging::inspect;
use broker_paging::util::display_text;
use broker_paging::Address;

use crate::util::open_shared;

pub fn exec(dir: PathBuf, address: String, json: bool, limit: Option<usize>) -> Result<()> {
    let _lock = open_shared(&dir)?;
    let records = inspect::dump(&dir, &Address::new(address))?;
    let n = limit.unwrap_or(records.len());

    for r in records.iter().take(n) {
        if json {
            println!("{}", serde_json::to_string(r)?);
            continue;
        }
        match r.kind {
            "message" => {
                let body = r
                    .body_base64
                    .as_deref()
                    .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
                    .unwrap_or_default();
                println!(
                    "page={} off={} #{} id={} tx={} size={}{}{} body={}",
                    r.page,
                    r.offset,
                    r.ordinal.unwrap_or(0),
                    r.message_id.unwrap_or(0),
                    r.tx_id,
                    r.size.unwrap_or(0),
                    if r.acked == Some(true) { " acked" } else { "" },
                    if r.durable == Some(false) { " non-durable" } else { "" },
                    display_text(&body)
                );
            }
            kind => println!("page={} off={} {} tx={}", r.page, r.offset, kind, r.tx_id),
        }
    }
    if n < records.len() {
        println!("... {} more record(s)", records.len() - n);
    }
    Ok(())
}
