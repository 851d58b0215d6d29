//! Fake processor and host backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::fake::FakeHardwareBuilder;
use crate::fake::builder::RegisterOverride;
use crate::pal::{Bindings, CpuidLeaf, Filesystem, MsrDevice};
use crate::{
    HWP_ENABLE_BIT, IA32_HWP_REQUEST, IA32_MISC_ENABLE, IA32_PM_ENABLE, IA32_POWER_CTL,
    MSR_CORE_THREAD_COUNT, MSR_PLATFORM_INFO, MSR_TURBO_RATIO_LIMIT, Msr, ProcessorId,
    RegisterScope, RegisterSite,
};

const MAX_BASIC_LEAF: u32 = 0x16;

// Thermal and power management leaf: digital thermal sensor, turbo boost, ARAT.
const THERMAL_POWER_BASE_EAX: u32 = 0b0111;
const HWP_EAX_BITS: u32 = 0b1111_1000_0000;

const SIGTERM: i32 = 15;

const DEFAULT_PLATFORM_INFO: u64 = 0x0000_0800_1001_1A00;
const DEFAULT_TURBO_RATIO_LIMIT: u64 = 0x2A2A_2C2C;
const DEFAULT_MISC_ENABLE: u64 = 0x0000_0000_0085_0089;
const DEFAULT_POWER_CTL: u64 = 0x0024_005C;
const DEFAULT_HWP_REQUEST: u64 = 0x8000_2C04;

const KNOWN_REGISTERS: [Msr; 7] = [
    MSR_CORE_THREAD_COUNT,
    MSR_PLATFORM_INFO,
    IA32_MISC_ENABLE,
    MSR_TURBO_RATIO_LIMIT,
    IA32_POWER_CTL,
    IA32_PM_ENABLE,
    IA32_HWP_REQUEST,
];

/// One write that reached a register through the platform.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterWrite {
    site: RegisterSite,
    value: u64,
}

impl RegisterWrite {
    /// Where the value was written.
    #[must_use]
    pub const fn site(&self) -> RegisterSite {
        self.site
    }

    /// The value that was written, before any sticky bits were merged in.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }
}

#[derive(Debug)]
struct State {
    processors: Vec<ProcessorId>,
    online_list: Option<String>,
    cpuid: HashMap<u32, CpuidLeaf>,
    registers: HashMap<u32, Msr>,
    values: BTreeMap<RegisterSite, u64>,
    sticky: HashMap<u32, u64>,
    faults: HashSet<u32>,
    write_faults: HashSet<u32>,
    writes: Vec<RegisterWrite>,
    files: HashMap<PathBuf, Vec<u8>>,
    lockdown: Option<String>,
}

impl State {
    fn site(&self, processor: ProcessorId, index: u32) -> io::Result<RegisterSite> {
        if !self.processors.contains(&processor) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("processor {processor} is not online"),
            ));
        }

        let register = self.registers.get(&index).ok_or_else(|| general_protection(index))?;

        self.site_of(*register, Some(processor))
            .ok_or_else(|| general_protection(index))
    }

    fn site_of(&self, register: Msr, processor: Option<ProcessorId>) -> Option<RegisterSite> {
        match (register.scope(), processor) {
            (RegisterScope::Package, _) => Some(RegisterSite::package(register)),
            (RegisterScope::Processor, Some(processor)) => {
                Some(RegisterSite::on_processor(register, processor))
            }
            (RegisterScope::Processor, None) => None,
        }
    }
}

fn general_protection(index: u32) -> io::Error {
    io::Error::other(format!("simulated general protection fault on MSR 0x{index:X}"))
}

/// A simulated Intel processor and Linux host.
///
/// Create with [`FakeHardware::builder()`] and pass to [`Platform::fake()`][crate::Platform::fake].
/// Keep the `Arc` to inspect and mutate the simulated state while the service runs.
#[derive(Debug)]
pub struct FakeHardware {
    state: Mutex<State>,
}

impl FakeHardware {
    /// Starts configuring fake hardware.
    #[must_use]
    pub fn builder() -> FakeHardwareBuilder {
        FakeHardwareBuilder::new()
    }

    pub(super) fn from_builder(builder: FakeHardwareBuilder) -> Self {
        let processors = builder.processors;

        let online_list = builder
            .publish_online_list
            .then(|| format!("{}\n", cpulist::emit(processors.iter().copied())));

        let mut registers = KNOWN_REGISTERS
            .iter()
            .map(|register| (register.index(), *register))
            .collect::<HashMap<_, _>>();

        let mut values = BTreeMap::new();
        let set_all = |values: &mut BTreeMap<RegisterSite, u64>, register: Msr, value: u64| {
            for site in RegisterSite::all(register, &processors) {
                values.insert(site, value);
            }
        };

        let core_count = u64::try_from(processors.len()).unwrap_or(u64::MAX) & 0xFFFF;

        set_all(&mut values, MSR_CORE_THREAD_COUNT, (core_count << 16) | core_count);
        set_all(&mut values, MSR_PLATFORM_INFO, DEFAULT_PLATFORM_INFO);
        set_all(&mut values, MSR_TURBO_RATIO_LIMIT, DEFAULT_TURBO_RATIO_LIMIT);
        set_all(&mut values, IA32_MISC_ENABLE, DEFAULT_MISC_ENABLE);
        set_all(&mut values, IA32_POWER_CTL, DEFAULT_POWER_CTL);

        if builder.hardware_pstate {
            set_all(&mut values, IA32_PM_ENABLE, 0);
            set_all(&mut values, IA32_HWP_REQUEST, DEFAULT_HWP_REQUEST);
        }

        for request in builder.registers {
            match request {
                RegisterOverride::All(register, value) => {
                    registers.insert(register.index(), register);
                    values.retain(|site, _| site.register().index() != register.index());
                    set_all(&mut values, register, value);
                }
                RegisterOverride::On(register, processor, value) => {
                    registers.insert(register.index(), register);
                    values.insert(RegisterSite::on_processor(register, processor), value);
                }
                RegisterOverride::Absent(register) => {
                    values.retain(|site, _| site.register().index() != register.index());
                }
            }
        }

        let mut cpuid = HashMap::new();
        cpuid.insert(0, vendor_leaf(builder.vendor));
        cpuid.insert(
            1,
            CpuidLeaf {
                eax: signature(builder.model),
                ..CpuidLeaf::default()
            },
        );
        cpuid.insert(
            6,
            CpuidLeaf {
                eax: if builder.hardware_pstate {
                    THERMAL_POWER_BASE_EAX | HWP_EAX_BITS
                } else {
                    THERMAL_POWER_BASE_EAX
                },
                ..CpuidLeaf::default()
            },
        );

        let mut sticky = HashMap::new();
        sticky.insert(IA32_PM_ENABLE.index(), HWP_ENABLE_BIT);

        Self {
            state: Mutex::new(State {
                processors,
                online_list,
                cpuid,
                registers,
                values,
                sticky,
                faults: builder.faults.iter().map(Msr::index).collect(),
                write_faults: builder.write_faults.iter().map(Msr::index).collect(),
                writes: Vec::new(),
                files: builder.files.into_iter().collect(),
                lockdown: builder.lockdown,
            }),
        }
    }

    /// The online logical processors.
    #[must_use]
    pub fn processors(&self) -> Vec<ProcessorId> {
        self.state.lock().processors.clone()
    }

    /// The current value of `register`, or `None` if it does not exist.
    ///
    /// The processor is ignored for package-wide registers and required for per-processor ones.
    #[must_use]
    pub fn register(&self, register: Msr, processor: Option<ProcessorId>) -> Option<u64> {
        let state = self.state.lock();
        let site = state.site_of(register, processor)?;
        state.values.get(&site).copied()
    }

    /// Changes a register behind the service's back, as firmware or the operating system would.
    ///
    /// Not recorded as a write. Sticky bits that are already set stay set.
    ///
    /// # Panics
    ///
    /// Panics if a per-processor register is addressed without a processor.
    pub fn set_register(&self, register: Msr, processor: Option<ProcessorId>, value: u64) {
        let mut state = self.state.lock();

        let site = state
            .site_of(register, processor)
            .expect("per-processor registers require a processor");
        let sticky = state.sticky.get(&register.index()).copied().unwrap_or(0);

        state.registers.insert(register.index(), register);
        let current = state.values.entry(site).or_insert(0);
        *current = value | (*current & sticky);
    }

    /// Makes accesses to `register` fault, or stop faulting.
    pub fn set_fault(&self, register: Msr, fault: bool) {
        let mut state = self.state.lock();

        if fault {
            state.faults.insert(register.index());
        } else {
            state.faults.remove(&register.index());
        }
    }

    /// Every write made through the platform so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<RegisterWrite> {
        self.state.lock().writes.clone()
    }

    /// The number of writes made through the platform so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// The number of writes to `register` (on any processor) made through the platform so far.
    #[must_use]
    pub fn writes_to(&self, register: Msr) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|write| write.site.register().index() == register.index())
            .count()
    }

    /// Forgets the recorded writes.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Creates or replaces a file.
    pub fn set_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.state.lock().files.insert(path.into(), contents.into());
    }

    /// Deletes a file if it exists.
    pub fn delete_file(&self, path: impl AsRef<Path>) {
        self.state.lock().files.remove(path.as_ref());
    }

    /// The contents of a file, or `None` if it does not exist.
    #[must_use]
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.lock().files.get(path.as_ref()).cloned()
    }

    /// Changes the kernel lockdown mode file. `None` removes it.
    pub fn set_lockdown(&self, contents: Option<&str>) {
        self.state.lock().lockdown = contents.map(str::to_string);
    }
}

fn vendor_leaf(vendor: [u8; 12]) -> CpuidLeaf {
    let [b0, b1, b2, b3, d0, d1, d2, d3, c0, c1, c2, c3] = vendor;

    CpuidLeaf {
        eax: MAX_BASIC_LEAF,
        ebx: u32::from_le_bytes([b0, b1, b2, b3]),
        edx: u32::from_le_bytes([d0, d1, d2, d3]),
        ecx: u32::from_le_bytes([c0, c1, c2, c3]),
    }
}

// Family 6, stepping 0xA, with the model split into base and extended fields.
fn signature(model: u8) -> u32 {
    let model = u32::from(model);
    ((model >> 4) << 16) | (0x6 << 8) | ((model & 0xF) << 4) | 0xA
}

impl MsrDevice for FakeHardware {
    fn read(&self, processor: ProcessorId, index: u32) -> io::Result<u64> {
        let state = self.state.lock();

        if state.faults.contains(&index) {
            return Err(general_protection(index));
        }

        let site = state.site(processor, index)?;

        state
            .values
            .get(&site)
            .copied()
            .ok_or_else(|| general_protection(index))
    }

    fn write(&self, processor: ProcessorId, index: u32, value: u64) -> io::Result<()> {
        let mut state = self.state.lock();

        if state.faults.contains(&index) || state.write_faults.contains(&index) {
            return Err(general_protection(index));
        }

        let site = state.site(processor, index)?;
        let sticky = state.sticky.get(&index).copied().unwrap_or(0);

        let current = state
            .values
            .get_mut(&site)
            .ok_or_else(|| general_protection(index))?;
        *current = value | (*current & sticky);

        state.writes.push(RegisterWrite { site, value });

        Ok(())
    }
}

impl Bindings for FakeHardware {
    fn cpuid(&self, leaf: u32, _subleaf: u32) -> CpuidLeaf {
        self.state
            .lock()
            .cpuid
            .get(&leaf)
            .copied()
            .unwrap_or_default()
    }

    fn block_termination_signals(&self) -> io::Result<()> {
        Ok(())
    }

    fn wait_for_termination_signal(&self) -> io::Result<i32> {
        Ok(SIGTERM)
    }
}

impl Filesystem for FakeHardware {
    fn get_cpu_online_contents(&self) -> Option<String> {
        self.state.lock().online_list.clone()
    }

    fn get_lockdown_contents(&self) -> Option<String> {
        self.state.lock().lockdown.clone()
    }

    fn read_prefix(&self, path: &Path, max_len: usize) -> io::Result<Vec<u8>> {
        let state = self.state.lock();
        let contents = state
            .files
            .get(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        Ok(contents.iter().take(max_len).copied().collect())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state
            .lock()
            .files
            .keys()
            .any(|file| file.starts_with(path))
    }

    fn create_empty_file(&self, path: &Path) -> io::Result<()> {
        self.state.lock().files.insert(path.to_path_buf(), Vec::new());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}
