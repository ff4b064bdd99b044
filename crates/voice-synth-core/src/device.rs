//! Compute device probing and selection.

use crate::config::Device;
use crate::Result;

#[cfg(any(feature = "cuda", feature = "coreml"))]
use ort::execution_providers::ExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(feature = "coreml")]
use ort::execution_providers::CoreMLExecutionProvider;

/// Reports which accelerators can be used.
pub trait DeviceProbe {
    /// Whether a CUDA-capable GPU is usable.
    fn cuda_available(&self) -> Result<bool>;

    /// Whether the Apple silicon accelerator is usable.
    fn mps_available(&self) -> Result<bool>;
}

/// Probe backed by ONNX Runtime's execution provider registry.
///
/// Providers not compiled in (see the `cuda` and `coreml` features) are
/// reported as unavailable without asking the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtProbe;

impl DeviceProbe for OrtProbe {
    fn cuda_available(&self) -> Result<bool> {
        #[cfg(feature = "cuda")]
        {
            crate::runtime::init()?;
            Ok(CUDAExecutionProvider::default().is_available()?)
        }
        #[cfg(not(feature = "cuda"))]
        {
            Ok(false)
        }
    }

    fn mps_available(&self) -> Result<bool> {
        #[cfg(all(feature = "coreml", target_vendor = "apple"))]
        {
            crate::runtime::init()?;
            Ok(CoreMLExecutionProvider::default().is_available()?)
        }
        #[cfg(not(all(feature = "coreml", target_vendor = "apple")))]
        {
            Ok(false)
        }
    }
}

/// Pick the device to run on: CUDA, then Apple accelerator, then CPU.
///
/// Stops probing at the first available accelerator. Probe errors are
/// returned as-is.
pub fn select_device<P: DeviceProbe + ?Sized>(probe: &P) -> Result<Device> {
    let device = if probe.cuda_available()? {
        Device::Cuda
    } else if probe.mps_available()? {
        Device::Mps
    } else {
        Device::Cpu
    };
    tracing::info!(%device, "Selected inference device");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::cell::Cell;

    struct FakeProbe {
        cuda: bool,
        mps: bool,
        mps_calls: Cell<usize>,
    }

    impl FakeProbe {
        fn new(cuda: bool, mps: bool) -> Self {
            Self {
                cuda,
                mps,
                mps_calls: Cell::new(0),
            }
        }
    }

    impl DeviceProbe for FakeProbe {
        fn cuda_available(&self) -> Result<bool> {
            Ok(self.cuda)
        }

        fn mps_available(&self) -> Result<bool> {
            self.mps_calls.set(self.mps_calls.get() + 1);
            Ok(self.mps)
        }
    }

    struct BrokenProbe;

    impl DeviceProbe for BrokenProbe {
        fn cuda_available(&self) -> Result<bool> {
            Err(Error::Runtime("driver query failed".into()))
        }

        fn mps_available(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_priority_order() {
        let cases = [
            (true, true, Device::Cuda),
            (true, false, Device::Cuda),
            (false, true, Device::Mps),
            (false, false, Device::Cpu),
        ];
        for (cuda, mps, expected) in cases {
            let device = select_device(&FakeProbe::new(cuda, mps)).unwrap();
            assert_eq!(device, expected, "cuda={} mps={}", cuda, mps);
        }
    }

    #[test]
    fn test_cuda_short_circuits() {
        let probe = FakeProbe::new(true, true);
        select_device(&probe).unwrap();
        assert_eq!(probe.mps_calls.get(), 0);
    }

    #[test]
    fn test_probe_error_propagates() {
        let err = select_device(&BrokenProbe).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_ort_probe_without_cuda_feature() {
        assert!(!OrtProbe.cuda_available().unwrap());
    }
}
