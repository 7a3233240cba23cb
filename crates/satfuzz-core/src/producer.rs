use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::artifacts::SeedWorkspace;
use crate::error::{FuzzError, Stage};
use crate::registry::{GeneratorMode, GeneratorRegistry};
use crate::supervisor::{Invocation, ProcessSupervisor, Redirect};

/// A generated CNF instance on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub seed: u64,
    pub mode: GeneratorMode,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Runs the registered generator for a seed and captures its CNF output.
#[derive(Debug)]
pub struct InstanceProducer<'a> {
    registry: &'a GeneratorRegistry,
    supervisor: &'a ProcessSupervisor,
    check_determinism: bool,
}

impl<'a> InstanceProducer<'a> {
    pub fn new(registry: &'a GeneratorRegistry, supervisor: &'a ProcessSupervisor) -> Self {
        Self {
            registry,
            supervisor,
            check_determinism: false,
        }
    }

    /// Also regenerate each instance and require byte-identical output.
    pub fn with_determinism_check(mut self, enabled: bool) -> Self {
        self.check_determinism = enabled;
        self
    }

    pub fn produce(
        &self,
        seed: u64,
        mode: GeneratorMode,
        workspace: &SeedWorkspace,
    ) -> Result<Instance, FuzzError> {
        let instance_path = workspace.instance_path();
        self.generate_into(seed, mode, &instance_path, workspace)?;
        let (sha256, size_bytes) = digest_file(&instance_path, seed, mode)?;
        debug!(seed, %mode, path = %instance_path.display(), size_bytes, "instance generated");

        if self.check_determinism {
            let replay_path = workspace.replay_instance_path();
            self.generate_into(seed, mode, &replay_path, workspace)?;
            let (replay_sha256, _) = digest_file(&replay_path, seed, mode)?;
            if replay_sha256 != sha256 {
                return Err(FuzzError::NondeterministicGenerator {
                    seed,
                    mode,
                    first: sha256,
                    second: replay_sha256,
                });
            }
            let _ = fs::remove_file(&replay_path);
        }

        Ok(Instance {
            seed,
            mode,
            path: instance_path,
            sha256,
            size_bytes,
        })
    }

    fn generate_into(
        &self,
        seed: u64,
        mode: GeneratorMode,
        destination: &Path,
        workspace: &SeedWorkspace,
    ) -> Result<(), FuzzError> {
        let spec = self.registry.lookup(mode)?;
        let invocation = Invocation::new(&spec.program)
            .args(spec.arguments(seed))
            .stdout(Redirect::File(destination.to_path_buf()))
            .stderr(Redirect::Append(workspace.generator_log()));

        let status = self
            .supervisor
            .run(&invocation)
            .map_err(|err| FuzzError::from_supervise(err, seed, mode, Stage::Generate, &spec.program))?;
        if !status.success() {
            return Err(FuzzError::GeneratorFailure { seed, mode, status });
        }
        Ok(())
    }
}

fn digest_file(path: &Path, seed: u64, mode: GeneratorMode) -> Result<(String, u64), FuzzError> {
    let bytes = fs::read(path).map_err(|source| FuzzError::Artifact {
        seed,
        mode,
        stage: Stage::Generate,
        path: path.to_path_buf(),
        source,
    })?;
    Ok((sha256_hex_bytes(&bytes), bytes.len() as u64))
}
