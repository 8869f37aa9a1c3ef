//! Executor device tags.

use std::fmt;

use bitflags::bitflags;

/// A single executor domain a task or buffer acquire can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorDevice {
    Cpu,
    GpuCl,
    GpuGl,
    GpuTexture,
    Dsp,
    Unspecified,
}

impl ExecutorDevice {
    /// The bit this device occupies within an `ExecutorDeviceSet`.
    fn bit(self) -> ExecutorDeviceSet {
        match self {
            ExecutorDevice::Cpu => ExecutorDeviceSet::CPU,
            ExecutorDevice::GpuCl => ExecutorDeviceSet::GPU_CL,
            ExecutorDevice::GpuGl => ExecutorDeviceSet::GPU_GL,
            ExecutorDevice::GpuTexture => ExecutorDeviceSet::GPU_TEXTURE,
            ExecutorDevice::Dsp => ExecutorDeviceSet::DSP,
            ExecutorDevice::Unspecified => ExecutorDeviceSet::empty(),
        }
    }
}

impl fmt::Display for ExecutorDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ExecutorDevice::Cpu => "cpu",
            ExecutorDevice::GpuCl => "gpu_cl",
            ExecutorDevice::GpuGl => "gpu_gl",
            ExecutorDevice::GpuTexture => "gpu_texture",
            ExecutorDevice::Dsp => "dsp",
            ExecutorDevice::Unspecified => "unspecified",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// A small bitset of `ExecutorDevice`s, used anywhere a task or
    /// acquire request may target more than one device kind at once.
    #[derive(Default)]
    pub struct ExecutorDeviceSet: u8 {
        const CPU         = 1 << 0;
        const GPU_CL      = 1 << 1;
        const GPU_GL      = 1 << 2;
        const GPU_TEXTURE = 1 << 3;
        const DSP         = 1 << 4;
    }
}

impl ExecutorDeviceSet {
    /// Devices whose acquires should be folded into `device_hints`.
    /// Textures are handled on demand and excluded, matching the
    /// original policy.
    fn hinted() -> ExecutorDeviceSet {
        ExecutorDeviceSet::CPU | ExecutorDeviceSet::GPU_CL
            | ExecutorDeviceSet::GPU_GL | ExecutorDeviceSet::DSP
    }

    /// The maximum number of distinct devices a single task may target at
    /// once.
    pub const MULTI_DEVICE_COUNT: usize = 4;

    pub fn single(device: ExecutorDevice) -> ExecutorDeviceSet {
        device.bit()
    }

    pub fn has(&self, device: ExecutorDevice) -> bool {
        self.contains(device.bit())
    }

    pub fn count(&self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Invokes `f` once per device present in the set, in enumeration
    /// order.
    pub fn for_each<F: FnMut(ExecutorDevice)>(&self, mut f: F) {
        for device in [
            ExecutorDevice::Cpu,
            ExecutorDevice::GpuCl,
            ExecutorDevice::GpuGl,
            ExecutorDevice::GpuTexture,
            ExecutorDevice::Dsp,
        ] {
            if self.has(device) {
                f(device);
            }
        }
    }

    pub(crate) fn hintable(&self) -> ExecutorDeviceSet {
        *self & Self::hinted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_membership_and_count() {
        let set = ExecutorDeviceSet::CPU | ExecutorDeviceSet::DSP;
        assert!(set.has(ExecutorDevice::Cpu));
        assert!(set.has(ExecutorDevice::Dsp));
        assert!(!set.has(ExecutorDevice::GpuCl));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn texture_excluded_from_hints() {
        let set = ExecutorDeviceSet::GPU_TEXTURE | ExecutorDeviceSet::CPU;
        assert_eq!(set.hintable(), ExecutorDeviceSet::CPU);
    }

    #[test]
    fn for_each_visits_in_enumeration_order() {
        let set = ExecutorDeviceSet::DSP | ExecutorDeviceSet::CPU;
        let mut seen = Vec::new();
        set.for_each(|d| seen.push(d));
        assert_eq!(seen, vec![ExecutorDevice::Cpu, ExecutorDevice::Dsp]);
    }
}
