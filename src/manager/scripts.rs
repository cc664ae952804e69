use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use log::info;

use crate::error::ScriptError;
use crate::models::task::TaskRecord;

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Trailer appended to every template; it records the job's terminal event.
pub const POST_EXEC: &str = "taskman_post_exec.sh";
const GENERATED_DIR: &str = "taskman";

/// Renders job scripts from templates under one directory.
pub struct ScriptGenerator {
    dir: PathBuf,
}

impl ScriptGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn template_path(&self, template: &str) -> PathBuf {
        self.dir.join(format!("{}.sh", template))
    }

    pub fn task_dir(&self, name: &str) -> PathBuf {
        self.dir.join(GENERATED_DIR).join(name)
    }

    pub fn script_path(&self, name: &str, task_id: &str) -> PathBuf {
        self.task_dir(name).join(format!("{}.sh", task_id))
    }

    /// Writes the task's script, overwriting any previous rendering.
    pub fn generate(&self, record: &TaskRecord) -> Result<PathBuf> {
        let mut script = read_template(&self.template_path(&record.template))?;
        script.push_str(&read_template(&self.dir.join(POST_EXEC))?);

        let script = script
            .replace("$TASKMAN_NAME", &record.name)
            .replace("$TASKMAN_ID", &record.task_id)
            .replace("$TASKMAN_ARGS", &record.args);

        let path = self.script_path(&record.name, &record.task_id);
        let write = |path: &Path| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &script)?;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        };
        write(&path).map_err(|source| ScriptError::Write {
            path: path.clone(),
            source,
        })?;

        info!("Created {}", path.display());
        Ok(path)
    }
}

fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| ScriptError::Template {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> TaskRecord {
        TaskRecord::new(
            "10-18_09-30-00_000001".into(),
            "resnet".into(),
            "train".into(),
            "--lr 0.1".into(),
        )
    }

    fn generator() -> (TempDir, ScriptGenerator) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("train.sh"),
            "#!/bin/bash\n#MSUB -N $TASKMAN_NAME\npython train.py $TASKMAN_ARGS\n",
        )
        .unwrap();
        fs::write(dir.path().join(POST_EXEC), "echo done $TASKMAN_ID\n").unwrap();
        let generator = ScriptGenerator::new(dir.path());
        (dir, generator)
    }

    #[test]
    fn substitutes_placeholders_and_appends_trailer() {
        let (dir, generator) = generator();
        let path = generator.generate(&record()).unwrap();

        assert_eq!(
            path,
            dir.path().join("taskman/resnet/10-18_09-30-00_000001.sh")
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "#!/bin/bash\n#MSUB -N resnet\npython train.py --lr 0.1\necho done 10-18_09-30-00_000001\n"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn regenerating_is_idempotent() {
        let (_dir, generator) = generator();
        let first = generator.generate(&record()).unwrap();
        let content = fs::read_to_string(&first).unwrap();
        let second = generator.generate(&record()).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second).unwrap(), content);
    }

    #[test]
    fn missing_template_is_reported() {
        let (_dir, generator) = generator();
        let mut task = record();
        task.template = "missing".into();
        assert!(matches!(
            generator.generate(&task),
            Err(ScriptError::Template { .. })
        ));
    }
}
