//! `list`: enumerate the session registry as a human-readable table or
//! as JSON for scripting.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_derive::Serialize;

use crate::registry;

#[derive(Serialize)]
struct SessionJson {
    name: String,
    clients: u32,
    created: i64,
    command: String,
    pid: i32,
}

#[derive(Serialize)]
struct ListingJson {
    sessions: Vec<SessionJson>,
}

pub fn run(json: bool) -> Result<()> {
    let mut sessions = registry::enumerate().context("enumerating sessions")?;
    sessions.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        let doc = ListingJson {
            sessions: sessions
                .into_iter()
                .map(|s| SessionJson {
                    name: s.name,
                    clients: s.clients,
                    created: s.created,
                    command: s.cmd,
                    pid: s.pid,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&doc).context("serializing session list")?);
        return Ok(());
    }

    println!("NAME\tCLIENTS\tCREATED\tCOMMAND\tPID");
    for s in sessions {
        println!("{}\t{}\t{}\t{}\t{}", s.name, s.clients, rfc3339(s.created), s.cmd, s.pid);
    }
    Ok(())
}

fn rfc3339(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}
