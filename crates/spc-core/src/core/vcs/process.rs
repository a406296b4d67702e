use std::{
    io::{self, Read},
    path::Path,
    process::{Command, Stdio},
    thread,
};

const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const TRUNCATION_MARKER: &str = "\n[...truncated...]\n";

fn max_capture_bytes() -> usize {
    std::env::var("SPC_MAX_CAPTURE_BYTES")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_CAPTURE_BYTES)
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Execute a program with stdin closed and capture stdout/stderr separately.
///
/// # Errors
///
/// Returns the spawn error unchanged (so `NotFound` can be told apart) or an
/// error when the output streams cannot be read.
pub fn run_command(
    program: &Path,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> io::Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    command.envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout pipe missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr pipe missing"))?;
    let limit = max_capture_bytes();
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_to_string_limited(stderr, limit));

    let status = child.wait()?;
    let code = status.code().unwrap_or(-1);
    let (mut stdout, stdout_truncated) = stdout_handle
        .join()
        .map_err(|_| io::Error::other("stdout thread panicked"))??;
    let (mut stderr, stderr_truncated) = stderr_handle
        .join()
        .map_err(|_| io::Error::other("stderr thread panicked"))??;
    if stdout_truncated {
        stdout.push_str(TRUNCATION_MARKER);
    }
    if stderr_truncated {
        stderr.push_str(TRUNCATION_MARKER);
    }
    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}

fn read_to_string_limited(mut reader: impl Read, limit: usize) -> io::Result<(String, bool)> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        append_limited(&mut buffer, &chunk[..read], limit, &mut truncated);
    }
    Ok((String::from_utf8_lossy(&buffer).to_string(), truncated))
}

/// Keep the last `limit` bytes; diagnostics usually end with the useful part.
fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    if limit == 0 {
        return;
    }
    if buffer.len().saturating_add(chunk.len()) <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    let old_len = buffer.len();
    let excess = old_len.saturating_add(chunk.len()).saturating_sub(limit);
    if excess >= old_len {
        buffer.clear();
        let drop_from_chunk = excess.saturating_sub(old_len).min(chunk.len());
        buffer.extend_from_slice(&chunk[drop_from_chunk..]);
    } else {
        buffer.drain(0..excess);
        buffer.extend_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[cfg(unix)]
    #[test]
    fn captures_streams_and_status_separately() -> io::Result<()> {
        let output = run_command(
            Path::new("/bin/sh"),
            &[
                "-c".to_string(),
                "printf out && printf err >&2; exit 7".to_string(),
            ],
            &[],
            Path::new("."),
        )?;
        assert_eq!(output.code, 7);
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn passes_environment_through() -> io::Result<()> {
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), "printf %s \"$HGPLAIN\"".to_string()],
            &[("HGPLAIN".to_string(), "1".to_string())],
            Path::new("."),
        )?;
        assert_eq!(output.stdout, "1");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn truncates_large_output() -> io::Result<()> {
        let bytes = DEFAULT_MAX_CAPTURE_BYTES + 1024;
        let output = run_command(
            Path::new("/bin/sh"),
            &[
                "-c".to_string(),
                format!("head -c {bytes} /dev/zero | tr '\\0' a"),
            ],
            &[],
            Path::new("."),
        )?;
        assert!(output.stdout.contains("[...truncated...]"));
        assert!(output.stdout.len() <= DEFAULT_MAX_CAPTURE_BYTES + 64);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn capture_limit_follows_the_environment() -> io::Result<()> {
        std::env::set_var("SPC_MAX_CAPTURE_BYTES", "64");
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), "head -c 500 /dev/zero | tr '\\0' b".to_string()],
            &[],
            Path::new("."),
        );
        std::env::remove_var("SPC_MAX_CAPTURE_BYTES");
        let output = output?;
        assert!(output.stdout.contains("[...truncated...]"));
        assert!(output.stdout.len() < 200);
        Ok(())
    }

    #[test]
    fn missing_program_reports_not_found() {
        let err = run_command(
            Path::new("/nonexistent/spc-no-such-tool"),
            &[],
            &[],
            Path::new("."),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn append_limited_keeps_the_tail() {
        let mut buffer = b"abcdef".to_vec();
        let mut truncated = false;
        append_limited(&mut buffer, b"ghij", 8, &mut truncated);
        assert!(truncated);
        assert_eq!(buffer, b"cdefghij");
    }
}
