//! ONNX Runtime implementations of the cascade classifiers.

use anyhow::{anyhow, bail, Result as AnyResult};
use ndarray::{Array2, Array3, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DynValue, Tensor};
use std::io::Read;
use std::path::{Path, PathBuf};

use super::classifier::{BatchClassifier, BatchOutput, ProposalClassifier, ProposalOutput};
use super::detector::Cascade;
use super::Stage;
use crate::config::{Config, NetConfig};
use crate::error::{CascadeError, Result};

/// Cascade backed by three ONNX Runtime sessions.
pub type OnnxCascade = Cascade<OnnxProposalNet, OnnxBatchNet, OnnxBatchNet>;

/// Load all three networks named in `config` and build a cascade.
pub fn load_cascade(config: &Config) -> AnyResult<OnnxCascade> {
    let models = &config.models;
    let proposal = OnnxProposalNet::load(&models.dir, &models.pnet, models.intra_threads)?;
    let refine = OnnxBatchNet::load(&models.dir, &models.rnet, models.intra_threads, Stage::Refine)?;
    let output = OnnxBatchNet::load(&models.dir, &models.onet, models.intra_threads, Stage::Output)?;
    Ok(Cascade::new(proposal, refine, output, config.detection.clone())?)
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, net: &NetConfig) -> AnyResult<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(&net.file);

    if !model_path.exists() {
        let Some(url) = net.url.as_deref() else {
            bail!("Model file {} not found and no download url configured", model_path.display());
        };

        tracing::info!(model = %net.file, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        write_model(response.into_reader(), &model_path)?;
        tracing::info!(model = %net.file, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

/// Stream `reader` into `path` through a `.part` file so an interrupted
/// download never leaves a truncated model behind.
fn write_model<R: Read>(mut reader: R, path: &Path) -> std::io::Result<()> {
    let partial = path.with_extension("part");
    let copied = std::fs::File::create(&partial)
        .and_then(|mut file| std::io::copy(&mut reader, &mut file).and_then(|_| file.sync_all()));

    match copied.and_then(|_| std::fs::rename(&partial, path)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn open_session(models_dir: &Path, net: &NetConfig, intra_threads: usize) -> AnyResult<Session> {
    let model_path = ensure_model(models_dir, net)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(&model_path)?;

    tracing::debug!(model = %net.file, "Model loaded");
    Ok(session)
}

fn to_input_tensor(input: Array4<f32>) -> Result<Tensor<f32>> {
    let (n, c, h, w) = input.dim();
    let data: Vec<f32> = input.iter().copied().collect();
    Ok(Tensor::from_array(([n, c, h, w], data.into_boxed_slice()))?)
}

/// Copy an f32 output out of the session results.
fn extract(value: Option<&DynValue>, stage: Stage, tensor: &'static str) -> Result<(Vec<usize>, Vec<f32>)> {
    let value = value.ok_or(CascadeError::MissingOutput { stage, tensor })?;
    let (shape, data) = value.try_extract_tensor::<f32>()?;
    let dims = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((dims, data.to_vec()))
}

fn shape_error(stage: Stage, tensor: &'static str, expected: Vec<usize>, actual: Vec<usize>) -> CascadeError {
    CascadeError::OutputShape {
        stage,
        tensor,
        expected,
        actual,
    }
}

/// Proposal network run over a whole pyramid level.
pub struct OnnxProposalNet {
    session: Session,
    net: NetConfig,
}

impl OnnxProposalNet {
    pub fn load(models_dir: &Path, net: &NetConfig, intra_threads: usize) -> AnyResult<Self> {
        let session = open_session(models_dir, net, intra_threads)?;
        Ok(Self {
            session,
            net: net.clone(),
        })
    }

    /// Drop the leading batch axis of a `[1, C, H, W]` output.
    fn to_map(dims: Vec<usize>, data: Vec<f32>, channels: usize, tensor: &'static str) -> Result<Array3<f32>> {
        if let [1, c, h, w] = dims[..] {
            if c == channels {
                return Array3::from_shape_vec((c, h, w), data)
                    .map_err(|_| shape_error(Stage::Propose, tensor, vec![1, c, h, w], dims));
            }
        }
        Err(shape_error(Stage::Propose, tensor, vec![1, channels, 0, 0], dims))
    }
}

impl ProposalClassifier for OnnxProposalNet {
    fn infer(&mut self, input: Array4<f32>) -> Result<ProposalOutput> {
        let input_tensor = to_input_tensor(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.net.input.as_str() => input_tensor])?;

        let (conf_dims, conf) = extract(outputs.get(self.net.confidence.as_str()), Stage::Propose, "confidence map")?;
        let (reg_dims, reg) = extract(outputs.get(self.net.regression.as_str()), Stage::Propose, "regression map")?;

        Ok(ProposalOutput {
            confidence: Self::to_map(conf_dims, conf, 2, "confidence map")?,
            regression: Self::to_map(reg_dims, reg, 4, "regression map")?,
        })
    }
}

/// Refine or output network run over a batch of square crops.
pub struct OnnxBatchNet {
    session: Session,
    net: NetConfig,
    stage: Stage,
}

impl OnnxBatchNet {
    pub fn load(models_dir: &Path, net: &NetConfig, intra_threads: usize, stage: Stage) -> AnyResult<Self> {
        if net.input_size == 0 {
            bail!("{} network needs a non-zero input_size", stage);
        }
        if stage == Stage::Output && net.landmarks.is_none() {
            bail!("output network needs a landmarks tensor name");
        }

        let session = open_session(models_dir, net, intra_threads)?;
        Ok(Self {
            session,
            net: net.clone(),
            stage,
        })
    }

    /// Flatten an `[N, K, ...]` output into `[N, K]`.
    fn to_rows(&self, dims: Vec<usize>, data: Vec<f32>, items: usize, tensor: &'static str) -> Result<Array2<f32>> {
        let per_item = if items == 0 { 0 } else { data.len() / items };
        if dims.first() != Some(&items) || per_item * items != data.len() {
            return Err(shape_error(self.stage, tensor, vec![items, per_item], dims));
        }
        Array2::from_shape_vec((items, per_item), data)
            .map_err(|_| shape_error(self.stage, tensor, vec![items, per_item], dims))
    }
}

impl BatchClassifier for OnnxBatchNet {
    fn input_size(&self) -> u32 {
        self.net.input_size
    }

    fn batch_infer(&mut self, batch: Array4<f32>) -> Result<BatchOutput> {
        let items = batch.dim().0;
        let input_tensor = to_input_tensor(batch)?;
        let outputs = self
            .session
            .run(ort::inputs![self.net.input.as_str() => input_tensor])?;

        let (conf_dims, conf) = extract(outputs.get(self.net.confidence.as_str()), self.stage, "confidence")?;
        let (reg_dims, reg) = extract(outputs.get(self.net.regression.as_str()), self.stage, "regression")?;
        let marks = match self.net.landmarks.as_deref() {
            Some(name) => Some(extract(outputs.get(name), self.stage, "landmarks")?),
            None => None,
        };
        drop(outputs);

        Ok(BatchOutput {
            confidence: self.to_rows(conf_dims, conf, items, "confidence")?,
            regression: self.to_rows(reg_dims, reg, items, "regression")?,
            landmarks: marks
                .map(|(dims, data)| self.to_rows(dims, data, items, "landmarks"))
                .transpose()?,
        })
    }
}
