use super::{InferenceBackend, InferenceOutput};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

/// One output tensor per feature scale (strides 8, 16, 32).
const YOLO_SCALES: usize = 3;
const INTRA_THREADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl ExecutionProvider {
    pub fn from_use_cuda(use_cuda: bool) -> Self {
        if use_cuda { Self::Cuda } else { Self::Cpu }
    }
}

/// ONNX Runtime executor for a batch-dynamic YOLOv4 export:
/// `[batch, 416, 416, 3]` in, three `[batch, g, g, 3, 85]` tensors out,
/// smallest stride first.
pub struct OrtBackend {
    session: Session,
}

impl OrtBackend {
    pub fn new(path: &str, provider: ExecutionProvider) -> anyhow::Result<Self> {
        // Global environment; a second commit is a no-op
        let _ = ort::init().commit();

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(INTRA_THREADS)?;

        let builder = match provider {
            ExecutionProvider::Cuda => builder.with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()
                    .error_on_failure(),
            ])?,
            ExecutionProvider::Cpu => builder,
        };

        let session = builder.commit_from_file(path)?;

        tracing::info!(model_path = path, provider = ?provider, "YOLOv4 model loaded");
        Ok(Self { session })
    }
}

impl InferenceBackend for OrtBackend {
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        tracing::trace!(shape = ?images.shape(), "Running executor");

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(images.view())?])?;

        anyhow::ensure!(
            outputs.len() == YOLO_SCALES,
            "model produced {} outputs, expected one per scale ({})",
            outputs.len(),
            YOLO_SCALES
        );

        let scales = outputs
            .iter()
            .map(|(_, value)| Ok(value.try_extract_array::<f32>()?.into_owned()))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(InferenceOutput::new(scales))
    }
}
