// The segment and task structures follow the 32-bit x86 layout on every target;
// only the instructions that touch the CPU are compiled for `target_arch = "x86"`.
pub mod x86;
