/*!
 * Command-backed snapshot driver
 *
 * Drives the platform shadow tooling: `vssadmin` for local volumes, `wmic`
 * against remote hosts, and `mklink`/`rmdir` for junctions. Output parsing
 * is tolerant; lines that do not match are skipped, and a shadow whose
 * creation time cannot be parsed is reported with the epoch so retention
 * treats it as oldest rather than invisible.
 */

use std::collections::HashMap;
use std::process::Command;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use super::{ShadowInfo, SnapshotDriver};
use crate::error::{ConvoyError, Result};

#[derive(Debug, Default, Clone)]
pub struct CommandVssDriver;

impl CommandVssDriver {
    pub fn new() -> Self {
        Self
    }

    fn exec(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, ?args, "snapshot command");
        let output = Command::new(program).args(args).output().map_err(|e| {
            ConvoyError::Snapshot {
                message: format!("failed to launch {}: {}", program, e),
                retryable: false,
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvoyError::Snapshot {
                message: format!(
                    "{} exited with {}: {}",
                    program,
                    output.status.code().unwrap_or(-1),
                    if stderr.trim().is_empty() {
                        stdout.trim()
                    } else {
                        stderr.trim()
                    }
                ),
                retryable: false,
            });
        }
        Ok(stdout)
    }

    /// "C:\\" -> "C:"
    fn drive_designator(volume: &str) -> String {
        volume.trim_end_matches('\\').to_string()
    }
}

impl SnapshotDriver for CommandVssDriver {
    fn create_shadow(&self, volume: &str, server: Option<&str>) -> Result<ShadowInfo> {
        match server {
            None => {
                let args = vec![
                    "create".to_string(),
                    "shadow".to_string(),
                    format!("/For={}", Self::drive_designator(volume)),
                ];
                let output = self.exec("vssadmin", &args)?;
                let (shadow_id, shadow_path) = parse_vssadmin_create(&output)?;
                Ok(ShadowInfo {
                    shadow_id,
                    shadow_path,
                    volume: volume.to_string(),
                    created_at: Utc::now(),
                    originator: None,
                })
            }
            Some(host) => {
                let args = vec![
                    format!("/node:{}", host),
                    "shadowcopy".to_string(),
                    "call".to_string(),
                    "create".to_string(),
                    format!("Volume={}", volume),
                ];
                let output = self.exec("wmic", &args)?;
                let shadow_id = parse_wmic_create(&output)?;

                // The create call returns only the id; the device path comes
                // from a follow-up list
                let shadows = self.list_shadows(server)?;
                let info = shadows
                    .into_iter()
                    .find(|s| s.shadow_id.eq_ignore_ascii_case(&shadow_id))
                    .ok_or_else(|| ConvoyError::Snapshot {
                        message: format!("created shadow {} not found on {}", shadow_id, host),
                        retryable: false,
                    })?;
                Ok(info)
            }
        }
    }

    fn delete_shadow(&self, shadow_id: &str, server: Option<&str>) -> Result<()> {
        match server {
            None => {
                let args = vec![
                    "delete".to_string(),
                    "shadows".to_string(),
                    format!("/Shadow={}", shadow_id),
                    "/Quiet".to_string(),
                ];
                self.exec("vssadmin", &args).map(|_| ())
            }
            Some(host) => {
                let args = vec![
                    format!("/node:{}", host),
                    "path".to_string(),
                    "Win32_ShadowCopy".to_string(),
                    "where".to_string(),
                    format!("ID='{}'", shadow_id),
                    "delete".to_string(),
                ];
                self.exec("wmic", &args).map(|_| ())
            }
        }
    }

    fn list_shadows(&self, server: Option<&str>) -> Result<Vec<ShadowInfo>> {
        match server {
            None => {
                let args = vec!["list".to_string(), "shadows".to_string()];
                let output = self.exec("vssadmin", &args)?;
                Ok(parse_vssadmin_list(&output))
            }
            Some(host) => {
                let args = vec![
                    format!("/node:{}", host),
                    "path".to_string(),
                    "Win32_ShadowCopy".to_string(),
                    "get".to_string(),
                    "DeviceObject,ID,InstallDate,VolumeName".to_string(),
                    "/format:list".to_string(),
                ];
                let output = self.exec("wmic", &args)?;
                Ok(parse_wmic_list(&output))
            }
        }
    }

    fn resolve_share(&self, server: &str, share: &str) -> Result<String> {
        let args = vec![
            format!("/node:{}", server),
            "share".to_string(),
            "where".to_string(),
            format!("Name='{}'", share),
            "get".to_string(),
            "Path".to_string(),
            "/format:list".to_string(),
        ];
        let output = self.exec("wmic", &args)?;
        for record in parse_wmic_records(&output) {
            if let Some(path) = record.get("Path") {
                if !path.is_empty() {
                    return Ok(path.clone());
                }
            }
        }
        Err(ConvoyError::Snapshot {
            message: format!("share {} not found on {}", share, server),
            retryable: false,
        })
    }

    fn create_junction(&self, junction_path: &str, target: &str) -> Result<()> {
        let args = vec![
            "/c".to_string(),
            "mklink".to_string(),
            "/J".to_string(),
            junction_path.to_string(),
            target.to_string(),
        ];
        self.exec("cmd", &args).map(|_| ())
    }

    fn remove_junction(&self, junction_path: &str) -> Result<()> {
        let args = vec![
            "/c".to_string(),
            "rmdir".to_string(),
            junction_path.to_string(),
        ];
        self.exec("cmd", &args).map(|_| ())
    }
}

/// Parse `vssadmin create shadow` output for the id and device path
fn parse_vssadmin_create(output: &str) -> Result<(String, String)> {
    let mut id = None;
    let mut path = None;
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Shadow Copy ID:") {
            id = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Shadow Copy Volume Name:") {
            path = Some(rest.trim().to_string());
        }
    }
    match (id, path) {
        (Some(id), Some(path)) => Ok((id, path)),
        _ => Err(ConvoyError::Snapshot {
            message: format!("unrecognized vssadmin create output: {}", output.trim()),
            retryable: false,
        }),
    }
}

/// Parse `vssadmin list shadows` into shadow records
fn parse_vssadmin_list(output: &str) -> Vec<ShadowInfo> {
    let mut shadows = Vec::new();
    let mut current_id: Option<String> = None;
    let mut current_volume: Option<String> = None;
    let mut current_time: Option<DateTime<Utc>> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Contained 1 shadow copies at creation time:") {
            current_time = parse_us_datetime(rest.trim());
        } else if let Some(rest) = trimmed.strip_prefix("Shadow Copy ID:") {
            current_id = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Original Volume:") {
            // "(C:)\\?\Volume{...}": the designator in parentheses is enough
            current_volume = rest
                .trim()
                .strip_prefix('(')
                .and_then(|s| s.split(')').next())
                .map(|s| format!("{}\\", s));
        } else if let Some(rest) = trimmed.strip_prefix("Shadow Copy Volume:") {
            if let Some(id) = current_id.take() {
                shadows.push(ShadowInfo {
                    shadow_id: id,
                    shadow_path: rest.trim().to_string(),
                    volume: current_volume.take().unwrap_or_default(),
                    created_at: current_time.take().unwrap_or_else(epoch),
                    originator: None,
                });
            }
        }
    }
    shadows
}

/// Parse `wmic shadowcopy call create` output for the new shadow id
fn parse_wmic_create(output: &str) -> Result<String> {
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("ShadowID =") {
            return Ok(rest.trim().trim_matches('"').to_string());
        }
    }
    Err(ConvoyError::Snapshot {
        message: format!("unrecognized wmic create output: {}", output.trim()),
        retryable: false,
    })
}

/// Split `/format:list` output into key/value records separated by blank
/// lines
fn parse_wmic_records(output: &str) -> Vec<HashMap<String, String>> {
    let mut records = Vec::new();
    let mut current = HashMap::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn parse_wmic_list(output: &str) -> Vec<ShadowInfo> {
    parse_wmic_records(output)
        .into_iter()
        .filter_map(|record| {
            let id = record.get("ID")?.clone();
            if id.is_empty() {
                return None;
            }
            Some(ShadowInfo {
                shadow_id: id,
                shadow_path: record.get("DeviceObject").cloned().unwrap_or_default(),
                volume: record.get("VolumeName").cloned().unwrap_or_default(),
                created_at: record
                    .get("InstallDate")
                    .and_then(|s| parse_wmi_datetime(s))
                    .unwrap_or_else(epoch),
                originator: None,
            })
        })
        .collect()
}

/// WMI datetime: `20240601100000.000000+000`
fn parse_wmi_datetime(s: &str) -> Option<DateTime<Utc>> {
    let body = s.split('.').next()?;
    let naive = NaiveDateTime::parse_from_str(body, "%Y%m%d%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// US-locale `6/1/2024 10:00:00 AM` as vssadmin prints it
fn parse_us_datetime(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%m/%d/%Y %I:%M:%S %p").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

fn epoch() -> DateTime<Utc> {
    match Utc.timestamp_opt(0, 0) {
        chrono::LocalResult::Single(ts) => ts,
        _ => {
            warn!("epoch construction failed");
            Utc::now()
        }
    }
}
