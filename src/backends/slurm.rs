//! Slurm batch-system back-end.
//!
//! Partitions form the first tree level, their jobs the second. Listings
//! shell out to `scontrol`, `sinfo`, and `squeue`; every CLI failure
//! degrades to an empty listing so a half-configured login node still
//! browses.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::json;

use super::{CLI_TIMEOUT, current_username, run_cli};
use crate::model::{ObjectClass, ProviderObject};
use crate::provider::ObjectSource;

const PARTITION_ICON: &str = "./resources/Partition.png";
const JOB_ICON: &str = "./resources/Job.png";
const MY_JOB_ICON: &str = "./resources/Job_IDCard.png";
const PERSON_ICON: &str = "./resources/IDCard.png";

/// squeue output format: one line per job, 14 pipe-separated fields.
/// %M elapsed, %l time limit, %C cpus, %m memory, %a account, %r reason,
/// %Q priority, %b gres.
const JOB_FIELDS: &str = "%i|%u|%D|%T|%P|%j|%C|%m|%l|%a|%M|%r|%Q|%b";

pub struct SlurmSource {
    scramble_users: bool,
    username: String,
}

impl SlurmSource {
    pub fn new(scramble_users: bool) -> Self {
        Self {
            scramble_users,
            username: current_username(),
        }
    }

    fn partitions(&self) -> Vec<String> {
        // Prefer scontrol for structured output.
        if let Ok(out) = run_cli("scontrol", &["show", "partition", "-o"], CLI_TIMEOUT) {
            let names = parse_partition_names(&out);
            if !names.is_empty() {
                return names;
            }
        }
        match run_cli("sinfo", &["-h", "-o", "%P"], CLI_TIMEOUT) {
            Ok(out) => out
                .lines()
                .map(|l| l.trim().trim_end_matches('*').to_string())
                .filter(|name| !name.is_empty())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(err) => {
                tracing::warn!("partition listing unavailable: {err:#}");
                Vec::new()
            }
        }
    }

    fn default_partition(&self) -> String {
        match run_cli("sinfo", &["-h", "-o", "%P"], CLI_TIMEOUT) {
            Ok(out) => out
                .lines()
                .map(str::trim)
                .find(|l| l.ends_with('*'))
                .map(|l| l.trim_end_matches('*').to_string())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    fn partition_config(&self, partition: &str) -> PartitionConfig {
        match run_cli("scontrol", &["show", "partition", partition], CLI_TIMEOUT) {
            Ok(out) => parse_partition_config(&out),
            Err(_) => PartitionConfig::default(),
        }
    }

    fn jobs_for_partition(&self, partition: &str) -> Vec<ProviderObject> {
        let out = if partition.is_empty() {
            run_cli("squeue", &["-h", "-o", JOB_FIELDS], CLI_TIMEOUT)
        } else {
            run_cli("squeue", &["-h", "-p", partition, "-o", JOB_FIELDS], CLI_TIMEOUT)
        };
        match out {
            Ok(out) => self.parse_jobs(&out),
            Err(err) => {
                tracing::warn!("job listing for '{partition}' unavailable: {err:#}");
                Vec::new()
            }
        }
    }

    fn my_jobs(&self) -> Vec<ProviderObject> {
        match run_cli("squeue", &["-h", "--me", "-o", JOB_FIELDS], CLI_TIMEOUT) {
            Ok(out) => self.parse_jobs(&out),
            Err(err) => {
                tracing::warn!("own-job listing unavailable: {err:#}");
                Vec::new()
            }
        }
    }

    /// Parse squeue output into typed job objects, skipping malformed lines.
    fn parse_jobs(&self, squeue_output: &str) -> Vec<ProviderObject> {
        squeue_output
            .lines()
            .filter_map(|line| parse_job_line(line, &self.username, self.scramble_users))
            .collect()
    }
}

impl ObjectSource for SlurmSource {
    fn root_objects(&self) -> Result<Vec<ProviderObject>> {
        let default_partition = self.default_partition();
        let mut objects = Vec::new();
        for partition in self.partitions() {
            let jobs = self.jobs_for_partition(&partition);
            let running = jobs
                .iter()
                .filter(|j| j.property("jobstate").as_deref() == Some("Running"))
                .count();
            let pending = jobs.len() - running;
            let config = self.partition_config(&partition);
            objects.push(
                ProviderObject::new(ObjectClass::SlurmPartition, format!("/{partition}"), &partition)
                    .icon(PARTITION_ICON)
                    .count(jobs.len() as u64)
                    .extra("isdefault", partition == default_partition)
                    .extra_opt("maxtime", config.max_time)
                    .extra_opt("totalnodes", config.total_nodes)
                    .extra("runningjobs", running as u64)
                    .extra("pendingjobs", pending as u64)
                    .extra("hasgpus", config.has_gpus),
            );
        }

        let me = if self.scramble_users {
            rot13(&self.username)
        } else {
            self.username.clone()
        };
        objects.push(ProviderObject::group(
            format!("/<ShowMy:{me}>"),
            "My Jobs",
            PERSON_ICON,
            self.my_jobs().len() as u64,
        ));
        Ok(objects)
    }

    fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
        // The partition is always the first segment; anything deeper refers
        // to jobs which are leaves.
        let partition = base
            .trim_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();
        Ok(self.jobs_for_partition(partition))
    }

    fn show_my(&self, _user: &str) -> Result<Vec<ProviderObject>> {
        let mut jobs = self.my_jobs();
        for job in &mut jobs {
            let jid = job.title.clone();
            job.extras.insert(
                "contextmenu".to_string(),
                json!([{
                    "title": "Show Resource Usage",
                    "action": "terminal",
                    "command": format!("show_job_usage {jid}; exit"),
                }]),
            );
        }
        Ok(jobs)
    }
}

#[derive(Debug, Default)]
struct PartitionConfig {
    max_time: Option<String>,
    total_nodes: Option<String>,
    has_gpus: bool,
}

fn parse_partition_names(scontrol_output: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for line in scontrol_output.lines() {
        for token in line.split_whitespace() {
            if let Some(name) = token.strip_prefix("PartitionName=") {
                names.insert(name.to_string());
                break;
            }
        }
    }
    names.into_iter().collect()
}

fn parse_partition_config(scontrol_output: &str) -> PartitionConfig {
    let mut config = PartitionConfig::default();
    for line in scontrol_output.lines() {
        if let Some(rest) = line.split("MaxTime=").nth(1) {
            config.max_time = rest.split_whitespace().next().map(str::to_string);
        }
        if let Some(rest) = line.split("TotalNodes=").nth(1) {
            config.total_nodes = rest.split_whitespace().next().map(str::to_string);
        }
        if line.to_lowercase().contains("gres") {
            config.has_gpus = true;
        }
    }
    config
}

/// Build one typed job object from a squeue line; `None` when the line does
/// not carry the expected 14 fields.
fn parse_job_line(line: &str, my_username: &str, scramble_users: bool) -> Option<ProviderObject> {
    let entry = line.trim();
    if entry.is_empty() {
        return None;
    }
    let parts: Vec<&str> = entry.splitn(14, '|').map(str::trim).collect();
    if parts.len() != 14 {
        return None;
    }
    let &[jid, user, nodes, state_raw, partition, jobname, cpus, memory, timelimit, account, elapsed, state_reason, priority, gres] =
        &parts[..]
    else {
        return None;
    };
    if jid.is_empty() {
        return None;
    }

    let (user, my_username) = if scramble_users {
        (rot13(user), rot13(my_username))
    } else {
        (user.to_string(), my_username.to_string())
    };

    let icon = if user == my_username { MY_JOB_ICON } else { JOB_ICON };
    let job_id = format!("/{partition}/{jid}").replacen("//", "/", 1);

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    Some(
        ProviderObject::new(ObjectClass::SlurmJob, job_id, jid)
            .icon(icon)
            .extra("jobarray", jid.contains('_'))
            .extra("userid", user)
            .extra("nodecount", nodes.parse::<u64>().unwrap_or(0))
            .extra("jobstate", capitalize_state(state_raw))
            .extra("partition", partition.to_string())
            .extra("jobname", jobname.to_string())
            .extra("cpus", cpus.parse::<u64>().unwrap_or(0))
            .extra_opt("totalmemory", non_empty(memory))
            .extra_opt("requestedruntime", non_empty(timelimit))
            .extra_opt("account", non_empty(account))
            .extra_opt("elapsedruntime", non_empty(elapsed))
            .extra_opt("state_reason", non_empty(state_reason))
            .extra_opt("priority", priority.parse::<i64>().ok())
            .extra_opt("remainingruntime", remaining_runtime(timelimit, elapsed))
            .extra_opt("gres", non_empty(gres)),
    )
}

/// "RUNNING" -> "Running".
fn capitalize_state(state: &str) -> String {
    let mut chars = state.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Slurm duration `[d-]hh:mm:ss` (or shorter) to seconds; non-numeric
/// components count as zero.
fn duration_seconds(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let (days, clock) = match text.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().unwrap_or(0), rest),
        None => (0, text),
    };
    let mut bits: Vec<u64> = clock
        .split(':')
        .map(|b| b.parse::<u64>().unwrap_or(0))
        .collect();
    while bits.len() < 3 {
        bits.insert(0, 0);
    }
    let &[hours, minutes, seconds] = &bits[bits.len() - 3..] else {
        return 0;
    };
    days * 86_400 + hours * 3_600 + minutes * 60 + seconds
}

/// Remaining runtime as `timelimit - elapsed`, rendered like squeue prints
/// durations. `None` when the time limit is unset.
fn remaining_runtime(timelimit: &str, elapsed: &str) -> Option<String> {
    if timelimit.is_empty() {
        return None;
    }
    let remaining = duration_seconds(timelimit).saturating_sub(duration_seconds(elapsed));
    let (days, rest) = (remaining / 86_400, remaining % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    Some(if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    })
}

/// ROT13 for user-name scrambling in demos.
fn rot13(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a' + 13) % 26) + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A' + 13) % 26) + b'A') as char,
            other => other,
        })
        .collect()
}
