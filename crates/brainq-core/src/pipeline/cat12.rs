//! MATLAB + SPM12 + CAT12 segmentation.
//!
//! Three stages, each reported to the task record:
//! 1. converting: bring the scan into the task directory as `<stem>.nii`
//!    (DICOM via SPM, NIfTI copied, gzipped NIfTI decompressed)
//! 2. segmenting: CAT12 `estwrite` writing native-space GM/WM/CSF maps
//! 3. extracting: tissue volumes from `mri/p{1,2,3}<stem>.nii`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{Pipeline, PipelineJob, ProgressReporter, ScanFormat, nifti, process};
use crate::config::PipelineConfig;
use crate::domain::VolumetricResult;
use crate::error::{ConfigError, PipelineError};
use crate::queue::Stage;

const CONVERT_SCRIPT: &str = "brainq_convert.m";
const SEGMENT_SCRIPT: &str = "brainq_cat12.m";

pub struct Cat12Pipeline {
    config: PipelineConfig,
}

impl Cat12Pipeline {
    /// Fails fast when the toolchain is not where the config says.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// `<output_dir>/mri/p{1,2,3}<stem>.nii`
    pub fn tissue_maps(output_dir: &Path, stem: &str) -> [PathBuf; 3] {
        let mri = output_dir.join("mri");
        [1, 2, 3].map(|class| mri.join(format!("p{class}{stem}.nii")))
    }

    async fn run_matlab(&self, script: &Path, working_dir: &Path) -> Result<(), PipelineError> {
        let args = vec![
            "-nodisplay".to_string(),
            "-nosplash".to_string(),
            "-batch".to_string(),
            format!("run({})", matlab_quote(script)),
        ];
        process::run(&self.config.matlab_path, &args, working_dir).await?;
        Ok(())
    }

    async fn write_script(&self, path: &Path, body: String) -> Result<(), PipelineError> {
        tokio::fs::write(path, body)
            .await
            .map_err(|e| PipelineError::io(format!("failed to write {}", path.display()), e))
    }

    async fn convert(
        &self,
        job: &PipelineJob,
        input: &Path,
        target: &Path,
    ) -> Result<(), PipelineError> {
        match job.format {
            ScanFormat::Nifti => {
                tokio::fs::copy(input, target).await.map_err(|e| {
                    PipelineError::io(format!("failed to copy {}", input.display()), e)
                })?;
            }
            ScanFormat::NiftiGz => {
                let (input, target) = (input.to_path_buf(), target.to_path_buf());
                tokio::task::spawn_blocking(move || {
                    let bytes = nifti::read_image(&input)?;
                    std::fs::write(&target, bytes).map_err(|e| {
                        PipelineError::io(format!("failed to write {}", target.display()), e)
                    })
                })
                .await
                .map_err(|e| PipelineError::io("decompression task failed", e.into()))??;
            }
            ScanFormat::Dicom => {
                let script = job.output_dir.join(CONVERT_SCRIPT);
                self.write_script(&script, self.convert_script(input, &job.output_dir, target))
                    .await?;
                self.run_matlab(&script, &job.output_dir).await?;
            }
        }
        if !tokio::fs::try_exists(target).await.unwrap_or(false) {
            return Err(PipelineError::MissingArtifact(target.to_path_buf()));
        }
        Ok(())
    }

    fn convert_script(&self, input: &Path, output_dir: &Path, target: &Path) -> String {
        format!(
            "addpath({spm});\n\
             spm('defaults', 'fmri');\n\
             hdr = spm_dicom_headers({input});\n\
             out = spm_dicom_convert(hdr, 'all', 'flat', 'nii', {outdir});\n\
             if isempty(out.files)\n\
             \x20   error('brainq:convert', 'no volume produced from DICOM input');\n\
             end\n\
             movefile(out.files{{1}}, {target});\n",
            spm = matlab_quote(&self.config.spm_path),
            input = matlab_quote(input),
            outdir = matlab_quote(output_dir),
            target = matlab_quote(target),
        )
    }

    fn segment_script(&self, nifti: &Path) -> String {
        let roi = if self.config.roi {
            "matlabbatch{1}.spm.tools.cat.estwrite.output.ROImenu.atlases.neuromorphometrics = 1;"
        } else {
            "matlabbatch{1}.spm.tools.cat.estwrite.output.ROImenu.noROI = struct([]);"
        };
        format!(
            "addpath({spm});\n\
             addpath({cat12});\n\
             spm('defaults', 'fmri');\n\
             spm_jobman('initcfg');\n\
             matlabbatch{{1}}.spm.tools.cat.estwrite.data = {{[{nifti} ',1']}};\n\
             matlabbatch{{1}}.spm.tools.cat.estwrite.nproc = 0;\n\
             matlabbatch{{1}}.spm.tools.cat.estwrite.output.surface = {surface};\n\
             {roi}\n\
             matlabbatch{{1}}.spm.tools.cat.estwrite.output.GM.native = 1;\n\
             matlabbatch{{1}}.spm.tools.cat.estwrite.output.WM.native = 1;\n\
             matlabbatch{{1}}.spm.tools.cat.estwrite.output.CSF.native = 1;\n\
             spm_jobman('run', matlabbatch);\n",
            spm = matlab_quote(&self.config.spm_path),
            cat12 = matlab_quote(&self.config.cat12_path),
            nifti = matlab_quote(nifti),
            surface = u8::from(self.config.surface),
        )
    }
}

#[async_trait]
impl Pipeline for Cat12Pipeline {
    async fn invoke(
        &self,
        job: &PipelineJob,
        progress: &ProgressReporter,
    ) -> Result<VolumetricResult, PipelineError> {
        let input = std::path::absolute(&job.input_path)
            .map_err(|e| PipelineError::io("failed to resolve input path", e))?;
        if !input.is_file() {
            return Err(PipelineError::io(
                format!("input scan {} is not readable", input.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        let stem = job.format.stem(&input);

        progress.stage(Stage::Converting).await;
        tokio::fs::create_dir_all(&job.output_dir).await.map_err(|e| {
            PipelineError::io(format!("failed to create {}", job.output_dir.display()), e)
        })?;
        let converted = job.output_dir.join(format!("{stem}.nii"));
        self.convert(job, &input, &converted).await?;

        progress.stage(Stage::Segmenting).await;
        let script = job.output_dir.join(SEGMENT_SCRIPT);
        self.write_script(&script, self.segment_script(&converted))
            .await?;
        self.run_matlab(&script, &job.output_dir).await?;

        progress.stage(Stage::Extracting).await;
        let maps = Self::tissue_maps(&job.output_dir, &stem);
        for map in &maps {
            if !tokio::fs::try_exists(map).await.unwrap_or(false) {
                return Err(PipelineError::MissingArtifact(map.clone()));
            }
        }
        let [gm, wm, csf] = tokio::task::spawn_blocking(move || {
            let [gm, wm, csf] = &maps;
            Ok::<_, PipelineError>([
                nifti::read_tissue_volume(gm)?,
                nifti::read_tissue_volume(wm)?,
                nifti::read_tissue_volume(csf)?,
            ])
        })
        .await
        .map_err(|e| PipelineError::io("volume extraction task failed", e.into()))??;

        let result = VolumetricResult::from_tissues(gm, wm, csf);
        info!(task_id = %job.task_id, tiv = result.tiv_volume, "tissue volumes extracted");
        Ok(result)
    }
}

/// MATLAB char literal: single quotes, embedded quotes doubled.
fn matlab_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::{Priority, TaskId};
    use crate::pipeline::nifti::encode_test_image;
    use crate::queue::{TaskRecord, TaskStatus, TaskStore};

    #[test]
    fn quotes_are_doubled_for_matlab() {
        assert_eq!(
            matlab_quote(Path::new("/data/O'Brien/scan.nii")),
            "'/data/O''Brien/scan.nii'"
        );
    }

    #[test]
    fn tissue_maps_follow_cat12_naming() {
        let [gm, wm, csf] = Cat12Pipeline::tissue_maps(Path::new("/out/t1"), "scan");
        assert_eq!(gm, Path::new("/out/t1/mri/p1scan.nii"));
        assert_eq!(wm, Path::new("/out/t1/mri/p2scan.nii"));
        assert_eq!(csf, Path::new("/out/t1/mri/p3scan.nii"));
    }

    #[test]
    fn segment_script_requests_native_tissue_maps() {
        let pipeline = Cat12Pipeline {
            config: PipelineConfig {
                roi: false,
                ..PipelineConfig::default()
            },
        };
        let script = pipeline.segment_script(Path::new("/out/t1/scan.nii"));
        assert!(script.contains("estwrite.data = {['/out/t1/scan.nii' ',1']};"));
        assert!(script.contains("GM.native = 1;"));
        assert!(script.contains("CSF.native = 1;"));
        assert!(script.contains("noROI"));
        assert!(script.contains("output.surface = 0;"));
    }

    #[test]
    fn construction_validates_toolchain() {
        let config = PipelineConfig {
            matlab_path: PathBuf::from("/missing/matlab"),
            ..PipelineConfig::default()
        };
        assert!(Cat12Pipeline::new(config).is_err());
    }

    #[cfg(unix)]
    mod toolchain {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        struct Fixture {
            _dir: tempfile::TempDir,
            root: PathBuf,
            pipeline: Cat12Pipeline,
            store: Arc<TaskStore>,
        }

        /// A fake `matlab` that runs `body` through sh. Inside `body`, `$*`
        /// holds the arguments and the working directory is the task dir.
        fn fixture(body: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let bin = root.join("matlab");
            std::fs::write(&bin, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
            let spm = root.join("spm12");
            let cat12 = spm.join("toolbox/cat12");
            std::fs::create_dir_all(&cat12).unwrap();

            let fixtures = root.join("fixtures");
            std::fs::create_dir_all(&fixtures).unwrap();
            // GM: 4 voxels, WM: 3, CSF: 1; voxels are 1 x 1 x 2 mm.
            for (name, voxels) in [
                ("gm.nii", [1.0, 1.0, 1.0, 1.0]),
                ("wm.nii", [0.9, 0.8, 0.7, 0.1]),
                ("csf.nii", [0.6, 0.0, 0.0, 0.0]),
            ] {
                let image = encode_test_image([2, 2, 1], [1.0, 1.0, 2.0], &voxels);
                std::fs::write(fixtures.join(name), image).unwrap();
            }

            let pipeline = Cat12Pipeline::new(PipelineConfig {
                matlab_path: bin,
                spm_path: spm,
                cat12_path: cat12,
                ..PipelineConfig::default()
            })
            .unwrap();
            Fixture {
                _dir: dir,
                root,
                pipeline,
                store: Arc::new(TaskStore::new()),
            }
        }

        impl Fixture {
            async fn job(&self, input_name: &str, contents: &[u8]) -> (PipelineJob, ProgressReporter) {
                let input = self.root.join("scans").join(input_name);
                std::fs::create_dir_all(input.parent().unwrap()).unwrap();
                std::fs::write(&input, contents).unwrap();

                let task_id = TaskId::new("t1");
                let output_dir = self.root.join("out").join(task_id.as_str());
                let mut record = TaskRecord::new(
                    task_id.clone(),
                    input.clone(),
                    output_dir.clone(),
                    Priority::Normal,
                    0,
                );
                record.mark_processing();
                self.store.insert(record).await.unwrap();

                let job = PipelineJob {
                    task_id: task_id.clone(),
                    format: ScanFormat::detect(&input).unwrap(),
                    input_path: input,
                    output_dir,
                };
                (job, ProgressReporter::new(self.store.clone(), task_id))
            }
        }

        /// Fake CAT12 run: copy the fixture maps into `mri/`.
        fn segmenting_writes_maps(stem: &str) -> String {
            format!(
                "case \"$*\" in *brainq_cat12.m*)\n\
                 f=\"$(dirname \"$0\")/fixtures\"\n\
                 mkdir -p mri\n\
                 cp \"$f/gm.nii\" mri/p1{stem}.nii\n\
                 cp \"$f/wm.nii\" mri/p2{stem}.nii\n\
                 cp \"$f/csf.nii\" mri/p3{stem}.nii\n\
                 ;; esac\nexit 0"
            )
        }

        #[tokio::test]
        async fn nifti_input_is_segmented_and_measured() {
            let fx = fixture(&segmenting_writes_maps("scan"));
            let original = encode_test_image([1, 1, 1], [1.0, 1.0, 1.0], &[1.0]);
            let (job, progress) = fx.job("scan.nii", &original).await;

            let result = fx.pipeline.invoke(&job, &progress).await.unwrap();
            assert_eq!(result.gm_volume, 8.0);
            assert_eq!(result.wm_volume, 6.0);
            assert_eq!(result.csf_volume, 2.0);
            assert_eq!(result.tiv_volume, 16.0);

            assert_eq!(std::fs::read(&job.input_path).unwrap(), original);
            assert!(job.output_dir.join("scan.nii").exists());
            assert!(job.output_dir.join(SEGMENT_SCRIPT).exists());

            let record = fx.store.get(&job.task_id).await.unwrap();
            assert_eq!(record.status, TaskStatus::Processing);
            assert_eq!(record.progress, Stage::Extracting.progress());
            assert_eq!(record.stage, Some(Stage::Extracting));
        }

        #[tokio::test]
        async fn dicom_input_goes_through_conversion() {
            let body = "case \"$*\" in\n\
                        *brainq_convert.m*) cp \"$(dirname \"$0\")/fixtures/gm.nii\" IM0001.nii ;;\n\
                        *brainq_cat12.m*) mkdir -p mri\n\
                        for c in 1 2 3; do cp \"$(dirname \"$0\")/fixtures/gm.nii\" mri/p${c}IM0001.nii; done ;;\n\
                        esac\nexit 0";
            let fx = fixture(body);
            let (job, progress) = fx.job("IM0001.dcm", b"DICM").await;

            let result = fx.pipeline.invoke(&job, &progress).await.unwrap();
            assert_eq!(result.gm_volume, 8.0);
            assert_eq!(result.tiv_volume, 24.0);
            assert!(job.output_dir.join(CONVERT_SCRIPT).exists());
        }

        #[tokio::test]
        async fn toolchain_failure_is_a_process_error() {
            let fx = fixture("echo 'License checkout failed' >&2\nexit 3");
            let (job, progress) = fx.job("scan.nii", b"x").await;

            let err = fx.pipeline.invoke(&job, &progress).await.unwrap_err();
            assert!(matches!(err, PipelineError::Process { exit_code: Some(3), .. }));
            assert!(err.to_string().contains("License checkout failed"));
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn clean_exit_without_maps_is_still_a_failure() {
            let fx = fixture("exit 0");
            let (job, progress) = fx.job("scan.nii", b"x").await;

            let err = fx.pipeline.invoke(&job, &progress).await.unwrap_err();
            match err {
                PipelineError::MissingArtifact(path) => {
                    assert!(path.ends_with("mri/p1scan.nii"));
                }
                other => panic!("expected missing artifact, got {other:?}"),
            }
        }
    }
}
