//! `info`: a fixed set of host signals useful for debugging a session
//! host, surfaced as stable `KEY:VALUE` lines or JSON.
use std::process::Command;

use anyhow::{Context, Result};
use serde_derive::Serialize;

use crate::daemon::user;
use crate::{consts, name, registry};

#[derive(Serialize)]
struct InfoJson {
    user: String,
    conda: String,
    load: String,
    disk: String,
    slurm_jobs: String,
    sessions: u32,
    backend: String,
}

pub fn run(json: bool) -> Result<()> {
    let u = user::info().context("resolving invoking user")?;
    let conda = std::env::var("CONDA_DEFAULT_ENV").unwrap_or_else(|_| "none".to_string());
    let load = load_average_1m();
    let disk = disk_usage_pct(&u.home_dir);
    let slurm_jobs = slurm_job_count(&u.user);
    let sessions = registry::enumerate().map(|s| s.len() as u32).unwrap_or(0);

    if json {
        let doc = InfoJson {
            user: u.user,
            conda,
            load,
            disk,
            slurm_jobs,
            sessions,
            backend: consts::BACKEND_ID.to_string(),
        };
        println!("{}", serde_json::to_string(&doc).context("serializing info")?);
        return Ok(());
    }

    println!("USER:{}", u.user);
    println!("CONDA:{}", conda);
    println!("LOAD:{}", load);
    println!("DISK:{}", disk);
    println!("SLURM_JOBS:{}", slurm_jobs);
    println!("SESSIONS:{}", sessions);
    println!("BACKEND:{}", consts::BACKEND_ID);
    Ok(())
}

/// String, not a bare float, so a platform where `getloadavg` fails can
/// report `"N/A"` instead of a misleading zero.
fn load_average_1m() -> String {
    let mut loads = [0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if n <= 0 {
        "N/A".to_string()
    } else {
        format!("{:.2}", loads[0])
    }
}

/// `"N/A"` when the home directory can't be `statvfs`'d, e.g. an empty
/// or otherwise missing home directory for the invoking user.
fn disk_usage_pct(home_dir: &str) -> String {
    let c_path = match std::ffi::CString::new(home_dir) {
        Ok(c) if !home_dir.is_empty() => c,
        _ => return "N/A".to_string(),
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 || stat.f_blocks == 0 {
        return "N/A".to_string();
    }
    let used = stat.f_blocks.saturating_sub(stat.f_bfree);
    format!("{:.1}", 100.0 * (used as f64) / (stat.f_blocks as f64))
}

/// Counts the invoking user's queued/running SLURM jobs by invoking
/// `squeue` directly with argv, never through a shell, and only once
/// the username has passed the same character-grammar check used for
/// session names, so a hostile `$USER` can't inject anything.
fn slurm_job_count(user_name: &str) -> String {
    if !name::is_valid(user_name) {
        return "N/A".to_string();
    }
    let output = Command::new("squeue").arg("-u").arg(user_name).arg("-h").output();
    match output {
        Ok(out) if out.status.success() => {
            String::from_utf8_lossy(&out.stdout).lines().filter(|l| !l.trim().is_empty()).count().to_string()
        }
        _ => "N/A".to_string(),
    }
}
