/// Run output on disk
///
/// One slot (`output/0`) holds the artifacts of the latest successful run:
/// - `input.png` - the processed model input
/// - `mesh.obj`  - the extracted mesh
///
/// New artifacts are staged next to their targets and renamed into place
/// only once both are written. If a rename fails, the previous run is put
/// back, so the slot never mixes two runs.

use image::ImageFormat;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::mesh::Mesh;
use crate::preprocess::ProcessedImage;

pub const INPUT_FILE: &str = "input.png";
pub const MESH_FILE: &str = "mesh.obj";

/// Suffix of the copy written by "save"
const COPY_SUFFIX: &str = "_modelo3D.obj";

/// Paths of a committed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub input_path: PathBuf,
    pub mesh_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunDirectory {
    dir: PathBuf,
}

impl RunDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.join(INPUT_FILE)
    }

    pub fn mesh_path(&self) -> PathBuf {
        self.dir.join(MESH_FILE)
    }

    /// Replace the slot contents with a new run
    ///
    /// Creates the directory if needed. The previous run is kept aside until
    /// both new files are in place.
    pub fn commit(&self, image: &ProcessedImage, mesh: &Mesh) -> Result<RunArtifacts, PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|e| PipelineError::persistence(&self.dir, e))?;

        let input_path = self.input_path();
        let mesh_path = self.mesh_path();
        let staged_input = staging_path(&input_path);
        let staged_mesh = staging_path(&mesh_path);

        let staged = image
            .to_rgb8()
            .save_with_format(&staged_input, ImageFormat::Png)
            .map_err(|source| PipelineError::PersistenceImage {
                path: staged_input.clone(),
                source,
            })
            .and_then(|_| {
                mesh.export(&staged_mesh)
                    .map_err(|e| PipelineError::persistence(&staged_mesh, e))
            });

        if let Err(e) = staged {
            let _ = fs::remove_file(&staged_input);
            let _ = fs::remove_file(&staged_mesh);
            return Err(e);
        }

        let moves = [(staged_input.clone(), input_path.clone()), (staged_mesh.clone(), mesh_path.clone())];
        if let Err(e) = replace_all(&moves) {
            let _ = fs::remove_file(&staged_input);
            let _ = fs::remove_file(&staged_mesh);
            return Err(PipelineError::persistence(&self.dir, e));
        }

        if !mesh_path.exists() {
            return Err(PipelineError::MeshMissing(mesh_path));
        }

        tracing::info!("Saved run to {}", self.dir.display());
        Ok(RunArtifacts { input_path, mesh_path })
    }
}

fn staging_path(target: &Path) -> PathBuf {
    with_suffix(target, ".partial")
}

fn with_suffix(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    target.with_file_name(name)
}

/// Rename every `(staged, target)` pair into place, all or nothing
///
/// Existing targets are moved to `*.previous` first. On failure the targets
/// already replaced are removed and the previous files restored. Staged
/// files that were not moved are left to the caller.
fn replace_all(moves: &[(PathBuf, PathBuf)]) -> io::Result<()> {
    let mut kept = Vec::new();
    let mut placed = Vec::new();

    let mut swap = || -> io::Result<()> {
        for (_, target) in moves {
            if target.exists() {
                let previous = with_suffix(target, ".previous");
                fs::rename(target, &previous)?;
                kept.push((previous, target.clone()));
            }
        }
        for (staged, target) in moves {
            fs::rename(staged, target)?;
            placed.push(target.clone());
        }
        Ok(())
    };

    match swap() {
        Ok(()) => {
            for (previous, _) in &kept {
                let _ = fs::remove_file(previous);
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!("Rolling back the run slot: {}", e);
            for target in &placed {
                let _ = fs::remove_file(target);
            }
            for (previous, target) in &kept {
                let _ = fs::rename(previous, target);
            }
            Err(e)
        }
    }
}

/// File name of the exported copy: source name up to its first dot
///
/// `cat.png` becomes `cat_modelo3D.obj`.
pub fn copy_file_name(source_image: &Path) -> String {
    let name = source_image
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    format!("{}{}", stem, COPY_SUFFIX)
}

/// Copy the mesh into `dest_dir`, overwriting an existing copy
pub async fn save_copy(
    mesh_path: PathBuf,
    source_image: PathBuf,
    dest_dir: PathBuf,
) -> Result<PathBuf, PipelineError> {
    let dest_path = dest_dir.join(copy_file_name(&source_image));

    tokio::fs::copy(&mesh_path, &dest_path)
        .await
        .map_err(|e| PipelineError::persistence(&dest_path, e))?;

    tracing::info!("Copied {} to {}", mesh_path.display(), dest_path.display());
    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("triposr-app-output-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn triangle(z: f32) -> Mesh {
        Mesh::new(vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]], vec![[0, 1, 2]], None)
    }

    #[test]
    fn test_copy_file_name() {
        assert_eq!(copy_file_name(Path::new("/photos/cat.png")), "cat_modelo3D.obj");
        assert_eq!(copy_file_name(Path::new("my.cat.jpeg")), "my_modelo3D.obj");
        assert_eq!(copy_file_name(Path::new("cat")), "cat_modelo3D.obj");
    }

    #[test]
    fn test_commit_creates_slot_and_leaves_no_staging_files() {
        let dir = scratch_dir("commit").join("0");
        let slot = RunDirectory::new(&dir);
        let image = ProcessedImage::from_rgb8(&RgbImage::new(8, 8));

        let artifacts = slot.commit(&image, &triangle(0.0)).unwrap();

        assert_eq!(artifacts.mesh_path, dir.join("mesh.obj"));
        assert!(artifacts.input_path.exists());
        let mut names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["input.png", "mesh.obj"]);

        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_commit_overwrites_previous_run() {
        let dir = scratch_dir("overwrite");
        let slot = RunDirectory::new(&dir);
        let image = ProcessedImage::from_rgb8(&RgbImage::new(8, 8));

        slot.commit(&image, &triangle(0.0)).unwrap();
        slot.commit(&image, &triangle(7.0)).unwrap();

        let mut expected = Vec::new();
        triangle(7.0).write_obj(&mut expected).unwrap();
        assert_eq!(fs::read(slot.mesh_path()).unwrap(), expected);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_rename_restores_the_previous_run() {
        let dir = scratch_dir("rollback");
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join(INPUT_FILE);
        let mesh = dir.join(MESH_FILE);
        fs::write(&input, "old input").unwrap();
        fs::write(&mesh, "old mesh").unwrap();

        // The staged mesh never got written, so its rename fails after the
        // input is already in place
        fs::write(staging_path(&input), "new input").unwrap();
        let moves = [(staging_path(&input), input.clone()), (staging_path(&mesh), mesh.clone())];

        assert!(replace_all(&moves).is_err());

        assert_eq!(fs::read_to_string(&input).unwrap(), "old input");
        assert_eq!(fs::read_to_string(&mesh).unwrap(), "old mesh");
        assert!(!with_suffix(&input, ".previous").exists());
        assert!(!with_suffix(&mesh, ".previous").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_save_copy_is_byte_identical() {
        let dir = scratch_dir("copy");
        let dest = dir.join("D");
        fs::create_dir_all(&dest).unwrap();
        let mesh_path = dir.join("mesh.obj");
        triangle(1.5).export(&mesh_path).unwrap();

        let copied = save_copy(mesh_path.clone(), PathBuf::from("cat.png"), dest.clone())
            .await
            .unwrap();

        assert_eq!(copied, dest.join("cat_modelo3D.obj"));
        assert_eq!(fs::read(&copied).unwrap(), fs::read(&mesh_path).unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_save_copy_into_missing_folder_fails() {
        let result = save_copy(
            PathBuf::from("/nonexistent/mesh.obj"),
            PathBuf::from("cat.png"),
            PathBuf::from("/nonexistent/dest"),
        )
        .await;

        assert!(matches!(result, Err(PipelineError::PersistenceFailed { .. })));
    }
}
