//! Append-only JSONL audit trail of gateway tool calls.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::permissions::PermissionTier;
use super::redact::redact;

pub const DEFAULT_AUDIT_FILE: &str = "mcp_audit.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Denied,
    Error,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditStatus::Success => "success",
            AuditStatus::Denied => "denied",
            AuditStatus::Error => "error",
        })
    }
}

/// One persisted call attempt. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub server_name: String,
    pub tool_name: String,
    pub permission_level: PermissionTier,
    pub arguments: Value,
    pub result_status: AuditStatus,
    pub result_message: String,
    pub user_confirmed: bool,
}

impl AuditEntry {
    /// Builds an entry stamped with the current local time. Arguments are
    /// redacted here so nothing unmasked can reach the log.
    pub fn new(
        server_name: &str,
        tool_name: &str,
        permission_level: PermissionTier,
        arguments: &Value,
        result_status: AuditStatus,
        result_message: impl Into<String>,
        user_confirmed: bool,
    ) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            permission_level,
            arguments: redact(arguments),
            result_status,
            result_message: result_message.into(),
            user_confirmed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. The file is opened and closed per write and is
    /// not locked against other processes.
    pub fn append(&self, entry: &AuditEntry) -> io::Result<()> {
        self.ensure_header()?;

        let line = serde_json::to_string(entry).map_err(io::Error::other)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{line}")?;
        writer.flush()?;

        info!(
            server = %entry.server_name,
            tool = %entry.tool_name,
            status = %entry.result_status,
            "Audit entry recorded"
        );
        Ok(())
    }

    fn ensure_header(&self) -> io::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        debug!(path = %self.path.display(), "Creating audit log");
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&self.path)
            .or_else(|err| {
                // Another writer created it between the check and the open.
                if err.kind() == io::ErrorKind::AlreadyExists {
                    OpenOptions::new().append(true).open(&self.path)
                } else {
                    Err(err)
                }
            })?;
        if file.metadata()?.len() == 0 {
            write!(
                file,
                "# MCP Audit Log\n# Created: {}\n\n",
                Local::now().to_rfc3339()
            )?;
        }
        Ok(())
    }

    /// Up to `count` most recent entries, newest first. Comment, blank and
    /// malformed lines are skipped. A missing file reads as empty.
    pub fn recent(&self, count: usize) -> io::Result<Vec<AuditEntry>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let entries = contents
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .take(count)
            .collect();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(tool: &str, status: AuditStatus) -> AuditEntry {
        AuditEntry::new(
            "fs",
            tool,
            PermissionTier::infer(tool),
            &json!({"path": "/tmp/x"}),
            status,
            "done",
            false,
        )
    }

    #[test]
    fn writes_header_once_then_one_line_per_entry() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("audit").join("mcp_audit.log"));

        logger.append(&entry("read_file", AuditStatus::Success)).unwrap();
        logger.append(&entry("delete_file", AuditStatus::Denied)).unwrap();

        let contents = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "# MCP Audit Log");
        assert!(lines[1].starts_with("# Created: "));
        assert_eq!(lines[2], "");
        assert_eq!(lines.len(), 5);
        assert_eq!(contents.matches("# MCP Audit Log").count(), 1);

        let record: Value = serde_json::from_str(lines[4]).unwrap();
        assert_eq!(record["tool_name"], "delete_file");
        assert_eq!(record["permission_level"], "dangerous");
        assert_eq!(record["result_status"], "denied");
        assert_eq!(record["user_confirmed"], false);
    }

    #[test]
    fn does_not_rewrite_header_for_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("existing.log");
        fs::write(&path, "{\"not\": \"an entry\"}\n").unwrap();

        let logger = AuditLogger::new(&path);
        logger.append(&entry("read_file", AuditStatus::Success)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("# MCP Audit Log"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn recent_reads_newest_first_and_skips_garbage() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("mcp_audit.log"));
        logger.append(&entry("first", AuditStatus::Success)).unwrap();
        logger.append(&entry("second", AuditStatus::Error)).unwrap();

        let mut file = OpenOptions::new().append(true).open(logger.path()).unwrap();
        writeln!(file, "not json at all").unwrap();
        writeln!(file).unwrap();
        drop(file);
        logger.append(&entry("third", AuditStatus::Success)).unwrap();

        let recent = logger.recent(2).unwrap();
        let tools: Vec<&str> = recent.iter().map(|e| e.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["third", "second"]);

        assert_eq!(logger.recent(10).unwrap().len(), 3);
        assert!(logger.recent(0).unwrap().is_empty());
    }

    #[test]
    fn recent_on_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("never-written.log"));
        assert!(logger.recent(5).unwrap().is_empty());
        assert!(!logger.path().exists());
    }

    #[test]
    fn entries_store_redacted_arguments() {
        let entry = AuditEntry::new(
            "amap",
            "maps_geo",
            PermissionTier::Normal,
            &json!({"address": "北京", "api_key": "sk-1234567890"}),
            AuditStatus::Success,
            "Tool call completed",
            false,
        );
        assert_eq!(entry.arguments["api_key"], "sk-1...7890");
        assert_eq!(entry.arguments["address"], "北京");
    }
}
