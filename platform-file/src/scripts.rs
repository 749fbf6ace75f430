//! Generated `run.sh` wrappers, so a job tree remains runnable by hand or
//! by an external scheduler without this crate in the loop.

use crate::error::FilePlatformError;
use crate::layout::{BATCH_SCRIPT, RUN_SCRIPT, STATUS_FILE, STDERR_FILE, STDOUT_FILE};
use std::fs;
use std::path::Path;
use sweeprun_core::task::CommandLine;

pub fn write_run_script(
    simulation_dir: &Path,
    command: &CommandLine,
) -> Result<(), FilePlatformError> {
    let script = render_run_script(command);
    let path = simulation_dir.join(RUN_SCRIPT);
    fs::write(&path, script).map_err(|e| FilePlatformError::io(&path, e))?;
    make_executable(&path)
}

fn render_run_script(command: &CommandLine) -> String {
    format!(
        "#!/usr/bin/env bash\n\
         # generated job wrapper; maintains {status} alongside the run\n\
         cd \"$(dirname \"$0\")\"\n\
         echo 100 > {status}\n\
         {command} 1> {stdout} 2> {stderr}\n\
         code=$?\n\
         if [ $code -eq 0 ]; then\n\
         \techo 0 > {status}\n\
         else\n\
         \techo -1 > {status}\n\
         fi\n\
         exit $code\n",
        status = STATUS_FILE,
        stdout = STDOUT_FILE,
        stderr = STDERR_FILE,
        command = command,
    )
}

/// Experiment-level script running every simulation's wrapper in turn.
pub fn write_batch_script(
    experiment_dir: &Path,
    simulation_ids: &[String],
) -> Result<(), FilePlatformError> {
    let mut script = String::from("#!/usr/bin/env bash\ncd \"$(dirname \"$0\")\"\n");
    for id in simulation_ids {
        script.push_str(&format!("bash \"{id}/{RUN_SCRIPT}\"\n"));
    }
    let path = experiment_dir.join(BATCH_SCRIPT);
    fs::write(&path, script).map_err(|e| FilePlatformError::io(&path, e))?;
    make_executable(&path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), FilePlatformError> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)
        .map_err(|e| FilePlatformError::io(path, e))?
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).map_err(|e| FilePlatformError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), FilePlatformError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::read_job_status;
    use crate::layout::JobStatus;
    use std::process::Command;

    #[test]
    fn script_mentions_command_and_status_file() {
        let command = CommandLine::from_string("python3 model.py --config config.json");
        let script = render_run_script(&command);
        assert!(script.contains("python3 model.py --config config.json"));
        assert!(script.contains(STATUS_FILE));
        assert!(script.starts_with("#!"));
    }

    #[test]
    fn script_runs_and_maintains_the_status_file() {
        let dir = tempfile::tempdir().unwrap();
        write_run_script(dir.path(), &CommandLine::from_string("echo out")).unwrap();
        let status = Command::new("bash")
            .arg(dir.path().join(RUN_SCRIPT))
            .status()
            .unwrap();
        assert!(status.success());
        assert_eq!(read_job_status(dir.path()).unwrap(), JobStatus::Succeeded);
        assert_eq!(
            fs::read_to_string(dir.path().join(STDOUT_FILE)).unwrap().trim(),
            "out"
        );
    }

    #[test]
    fn batch_script_runs_every_simulation_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let ids = vec!["Simulation0000".to_owned(), "Simulation0001".to_owned()];
        for id in &ids {
            let sim = dir.path().join(id);
            fs::create_dir_all(&sim).unwrap();
            write_run_script(&sim, &CommandLine::from_string("true")).unwrap();
        }
        write_batch_script(dir.path(), &ids).unwrap();

        let status = Command::new("bash")
            .arg(dir.path().join(BATCH_SCRIPT))
            .status()
            .unwrap();
        assert!(status.success());
        for id in &ids {
            assert_eq!(
                read_job_status(&dir.path().join(id)).unwrap(),
                JobStatus::Succeeded
            );
        }
    }

    #[test]
    fn failing_script_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_run_script(dir.path(), &CommandLine::from_string("false")).unwrap();
        let status = Command::new("bash")
            .arg(dir.path().join(RUN_SCRIPT))
            .status()
            .unwrap();
        assert!(!status.success());
        assert_eq!(read_job_status(dir.path()).unwrap(), JobStatus::Failed);
    }
}
