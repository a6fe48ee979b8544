//! Out-of-process payload transforms.
//!
//! A middleware is an arbitrary executable treated as a total pure function
//! over a [`Payload`]: one JSON document in on stdin, one JSON document out on
//! stdout, exit code zero. Running it out of process trades a spawn per
//! request for complete isolation; middleware authors can use whatever
//! scripting tools they like.
//!
//! The runner never mutates the caller's payload. On any failure the caller
//! keeps the original and decides, per mode, whether that is fatal.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::payload::Payload;

/// A middleware invocation failed; the payload in the caller's hands is
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("no middleware command configured")]
    NotConfigured,
    #[error("could not spawn middleware {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not exchange payload with middleware {command}: {source}")]
    Pipe {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("middleware {command} exited with code {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("middleware {command} wrote output that is not a payload: {source}")]
    Malformed {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Runs the middleware executable over a payload and returns the transformed
/// payload.
///
/// The command is spawned with no arguments. Its stdin receives the payload
/// serialized to JSON, its stdout is read to completion, and its stderr is
/// captured for diagnostics.
///
/// # Errors
///
/// Fails when the executable cannot be spawned, exits non-zero (or on a
/// signal), or writes stdout that does not parse as a payload. The exit code
/// and captured stderr are carried in the error.
pub async fn apply(command: &str, payload: &Payload) -> Result<Payload, MiddlewareError> {
    let document = serde_json::to_vec(payload).map_err(|source| MiddlewareError::Malformed {
        command: command.to_string(),
        source,
    })?;

    let mut child = Command::new(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| MiddlewareError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&document)
            .await
            .map_err(|source| MiddlewareError::Pipe {
                command: command.to_string(),
                source,
            })?;
        // Dropping stdin closes the pipe so the child sees EOF.
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| MiddlewareError::Pipe {
            command: command.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(MiddlewareError::Failed {
            command: command.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|source| MiddlewareError::Malformed {
        command: command.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ResponseDetails;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn payload() -> Payload {
        Payload {
            response: ResponseDetails {
                status: 200,
                body: "original".into(),
                ..ResponseDetails::default()
            },
            id: "abc".into(),
            ..Payload::default()
        }
    }

    #[tokio::test]
    async fn identity_middleware_returns_the_payload_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = write_script(dir.path(), "identity", "#!/bin/sh\ncat\n");

        let out = apply(&cmd, &payload()).await.unwrap();
        assert_eq!(out, payload());
    }

    #[tokio::test]
    async fn transforming_middleware_replaces_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = write_script(
            dir.path(),
            "teapot",
            "#!/bin/sh\ncat > /dev/null\nprintf '%s' '{\"response\":{\"status\":418,\"body\":\"teapot\",\"headers\":{}}}'\n",
        );

        let out = apply(&cmd, &payload()).await.unwrap();
        assert_eq!(out.response.status, 418);
        assert_eq!(out.response.body, "teapot");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = write_script(
            dir.path(),
            "broken",
            "#!/bin/sh\ncat > /dev/null\necho boom >&2\nexit 3\n",
        );

        match apply(&cmd, &payload()).await.unwrap_err() {
            MiddlewareError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn garbage_output_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = write_script(
            dir.path(),
            "garbage",
            "#!/bin/sh\ncat > /dev/null\necho 'not json'\n",
        );

        assert!(matches!(
            apply(&cmd, &payload()).await.unwrap_err(),
            MiddlewareError::Malformed { .. }
        ));
    }

    #[tokio::test]
    async fn unspawnable_command_is_reported() {
        assert!(matches!(
            apply("/does/not/exist", &payload()).await.unwrap_err(),
            MiddlewareError::Spawn { .. }
        ));
    }
}
