//! The engine lockfile: connection info for the desktop front-end.
//!
//! Written 0600 since it carries the bearer token.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct Lockfile {
    pub port: u16,
    pub token: String,
    pub engine_uuid: String,
    pub pids: Vec<u32>,
    pub created_at_ms: i64,
}

pub fn write_lockfile(path: &Path, port: u16, token: &str) -> anyhow::Result<()> {
    let lock = Lockfile {
        port,
        token: token.to_string(),
        engine_uuid: uuid::Uuid::new_v4().to_string(),
        pids: vec![std::process::id()],
        created_at_ms: chrono::Utc::now().timestamp_millis(),
    };
    let json = serde_json::to_string_pretty(&lock)?;
    std::fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockfile_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("engine.lock");
        write_lockfile(&path, 8090, "secret").unwrap();

        let parsed: Lockfile =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.port, 8090);
        assert_eq!(parsed.token, "secret");
        assert_eq!(parsed.pids, vec![std::process::id()]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
