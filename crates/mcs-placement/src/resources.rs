//! Generic resource tuples and the VM overhead model.
//!
//! Every VM reserves part of its size for the guest OS and the kubelet.
//! `available_of_vm` turns a total VM size into what pods can use, and
//! `total_for_available` is its inverse (rounded up) used to size VMs.

use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Tolerance for comparing binary floating point quantities.
pub const FLOAT_DELTA: f64 = 0.0001;

/// `(cpu cores, memory MiB, storage GiB)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericResources {
    pub cpu_core: f64,
    pub memory: f64,
    pub storage: f64,
}

impl GenericResources {
    pub fn new(cpu_core: f64, memory: f64, storage: f64) -> Self {
        Self {
            cpu_core,
            memory,
            storage,
        }
    }

    /// True if all three coordinates are strictly greater than `other`'s.
    pub fn all_more_than(&self, other: &GenericResources) -> bool {
        self.cpu_core > other.cpu_core && self.memory > other.memory && self.storage > other.storage
    }

    /// True if no coordinate is negative beyond float tolerance.
    pub fn non_negative(&self) -> bool {
        self.cpu_core > -FLOAT_DELTA && self.memory > -FLOAT_DELTA && self.storage > -FLOAT_DELTA
    }

    pub fn clamp_non_negative(self) -> Self {
        Self::new(self.cpu_core.max(0.0), self.memory.max(0.0), self.storage.max(0.0))
    }
}

impl Add for GenericResources {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.cpu_core + rhs.cpu_core,
            self.memory + rhs.memory,
            self.storage + rhs.storage,
        )
    }
}

impl Sub for GenericResources {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.cpu_core - rhs.cpu_core,
            self.memory - rhs.memory,
            self.storage - rhs.storage,
        )
    }
}

impl AddAssign for GenericResources {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for GenericResources {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for GenericResources {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

// ── VM overhead ────────────────────────────────────────────────

/// Cores pods can use on a VM with `total` vCPUs.
pub fn vm_avail_vcpu(total: f64) -> f64 {
    (total.floor() - 1.0).max(0.0)
}

/// vCPUs a VM needs so that pods can use `avail` cores.
pub fn vm_total_vcpu(avail: f64) -> f64 {
    avail.ceil() + 1.0
}

/// MiB pods can use on a VM with `total` MiB.
pub fn vm_avail_ram(total: f64) -> f64 {
    (0.9 * total - 1024.0).floor().max(0.0)
}

pub fn vm_total_ram(avail: f64) -> f64 {
    ((avail + 1024.0) / 0.9).ceil()
}

/// GiB pods can use on a VM with `total` GiB of disk.
pub fn vm_avail_storage(total: f64) -> f64 {
    (0.75 * total - 10.0).floor().max(0.0)
}

pub fn vm_total_storage(avail: f64) -> f64 {
    ((avail + 10.0) / 0.75).ceil()
}

/// What pods can use on a VM of the given total size.
pub fn available_of_vm(total: GenericResources) -> GenericResources {
    GenericResources::new(
        vm_avail_vcpu(total.cpu_core),
        vm_avail_ram(total.memory),
        vm_avail_storage(total.storage),
    )
}

/// The smallest VM size that leaves `avail` for pods.
pub fn total_for_available(avail: GenericResources) -> GenericResources {
    GenericResources::new(
        vm_total_vcpu(avail.cpu_core),
        vm_total_ram(avail.memory),
        vm_total_storage(avail.storage),
    )
}

/// Round `value` to the nearest multiple of `step`.
pub fn unit_round(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

/// Round `value` down to a multiple of `step`.
pub fn unit_floor(value: f64, step: f64) -> f64 {
    (value / step).floor() * step
}

/// Snap to the step grid: round when already on it within tolerance, else floor.
pub fn snap_to_step(value: f64, step: f64) -> f64 {
    let rounded = unit_round(value, step);
    if (value - rounded).abs() < FLOAT_DELTA {
        rounded
    } else {
        unit_floor(value, step)
    }
}
