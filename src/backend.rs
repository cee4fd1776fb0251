//! Backend abstraction - Multi-backend support
//!
//! CUDA (GPU) when the `cuda` feature is on, NdArray (CPU) otherwise.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}
