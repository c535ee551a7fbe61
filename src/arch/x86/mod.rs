pub mod cpu;
pub mod gdt;
pub mod interrupts;
pub mod process;

pub use cpu::DescriptorLoader;
#[cfg(target_arch = "x86")]
pub use cpu::Cpu;
