//! The fetch-execute loop described in §4.7: fetch `a`/`b`, handle the
//! memory-mapped I/O convention, flip `a`, halt on self-loop, else jump.

use crate::error::VmError;
use crate::memory::Memory;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::collections::{HashSet, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The four reserved bit offsets from the assembled `IO` label: two for
/// output (writing which bit to emit), two symmetric ones for input (a
/// read-port trigger and the bit the interpreter fills in for the program
/// to inspect). The exact addressing of the input pair is left
/// implementation-defined by the spec; this is one consistent scheme.
#[derive(Debug, Clone, Copy)]
pub struct IoAddresses {
    pub base: u128,
}

impl IoAddresses {
    pub fn new(base: u128) -> IoAddresses {
        IoAddresses { base }
    }

    fn output_zero(&self) -> u128 {
        self.base
    }

    fn output_one(&self) -> u128 {
        self.base + 1
    }

    fn input_window(&self) -> u128 {
        self.base + 2
    }

    fn input_bit(&self) -> u128 {
        self.base + 3
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub width: u32,
    pub step_limit: u64,
    pub trace_len: usize,
    pub cancellation_poll_interval: u64,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            width: 64,
            step_limit: 1 << 30,
            trace_len: 10,
            cancellation_poll_interval: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Halted,
    Breakpoint,
    Cancelled,
}

pub struct Vm<'io> {
    memory: Memory,
    ip: u128,
    io: IoAddresses,
    config: VmConfig,
    step_count: u64,
    trace: VecDeque<u128>,
    breakpoints: HashSet<u128>,
    breakpoint_substrings: Vec<String>,
    label_at: std::collections::HashMap<u128, String>,
    output: Box<dyn Write + 'io>,
    input: Box<dyn Read + 'io>,
    input_exhausted: bool,
    pending_input_bits: VecDeque<bool>,
    output_bit_buffer: Vec<bool>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'io> Vm<'io> {
    pub fn new(
        memory: Memory,
        entry: u128,
        io: IoAddresses,
        config: VmConfig,
        output: impl Write + 'io,
        input: impl Read + 'io,
    ) -> Vm<'io> {
        Vm {
            memory,
            ip: entry,
            io,
            config,
            step_count: 0,
            trace: VecDeque::with_capacity(config.trace_len),
            breakpoints: HashSet::new(),
            breakpoint_substrings: Vec::new(),
            label_at: std::collections::HashMap::new(),
            output: Box::new(output),
            input: Box::new(input),
            input_exhausted: false,
            pending_input_bits: VecDeque::new(),
            output_bit_buffer: Vec::new(),
            cancel: None,
        }
    }

    pub fn set_cancellation_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Registers breakpoints by exact resolved address, with a human name
    /// kept for reporting.
    pub fn add_breakpoint(&mut self, address: u128, name: impl Into<String>) {
        self.breakpoints.insert(address);
        self.label_at.insert(address, name.into());
    }

    pub fn add_breakpoint_substring(&mut self, substr: impl Into<String>) {
        self.breakpoint_substrings.push(substr.into());
    }

    pub fn ip(&self) -> u128 {
        self.ip
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn trace(&self) -> impl Iterator<Item = &u128> {
        self.trace.iter()
    }

    fn mask(&self, addr: u128) -> u128 {
        if self.config.width >= 128 {
            addr
        } else {
            addr & ((1u128 << self.config.width) - 1)
        }
    }

    fn at_breakpoint(&self) -> bool {
        if self.breakpoints.contains(&self.ip) {
            return true;
        }
        if let Some(name) = self.label_at.get(&self.ip) {
            return self
                .breakpoint_substrings
                .iter()
                .any(|pattern| name.contains(pattern.as_str()));
        }
        false
    }

    /// Runs until halt, a breakpoint, cancellation, or the step limit is
    /// exceeded.
    pub fn run(&mut self) -> Result<StopReason, VmError> {
        loop {
            if self.at_breakpoint() && self.step_count > 0 {
                return Ok(StopReason::Breakpoint);
            }
            if let Some(reason) = self.step()? {
                return Ok(reason);
            }
        }
    }

    /// Executes a single `a;b` operation. Returns `Some(reason)` if the VM
    /// has stopped (halted or cancelled); `None` to keep stepping.
    pub fn step(&mut self) -> Result<Option<StopReason>, VmError> {
        if self.step_count >= self.config.step_limit {
            return Err(VmError::RunTimeExceeded);
        }
        if let Some(flag) = &self.cancel {
            let due = self.config.cancellation_poll_interval == 0
                || self.step_count % self.config.cancellation_poll_interval == 0;
            if due && flag.load(Ordering::Relaxed) {
                return Ok(Some(StopReason::Cancelled));
            }
        }

        let width = self.config.width;
        let a = self.mask(self.memory.read_word(self.ip, width).to_u128_addr());
        let b_addr = self.mask(self.ip.wrapping_add(width as u128));
        let b = self.mask(self.memory.read_word(b_addr, width).to_u128_addr());

        self.step_count += 1;
        if self.trace.len() == self.config.trace_len && self.config.trace_len > 0 {
            self.trace.pop_front();
        }
        if self.config.trace_len > 0 {
            self.trace.push_back(self.ip);
        }

        self.memory.flip_bit(a);
        if a == self.io.output_zero() {
            self.emit_bit(false)?;
        } else if a == self.io.output_one() {
            self.emit_bit(true)?;
        }

        if b == self.ip {
            return Ok(Some(StopReason::Halted));
        }
        self.ip = self.mask(b);

        if self.ip == self.io.input_window() {
            let bit = self.next_input_bit();
            self.memory.set_bit(self.io.input_bit(), bit);
        }

        Ok(None)
    }

    fn emit_bit(&mut self, bit: bool) -> Result<(), VmError> {
        self.output_bit_buffer.push(bit);
        if self.output_bit_buffer.len() == 8 {
            let mut byte = 0u8;
            for (i, bit) in self.output_bit_buffer.drain(..).enumerate() {
                if bit {
                    byte |= 1 << i;
                }
            }
            self.output.write_all(&[byte])?;
        }
        Ok(())
    }

    fn next_input_bit(&mut self) -> bool {
        if let Some(bit) = self.pending_input_bits.pop_front() {
            return bit;
        }
        if self.input_exhausted {
            return false;
        }
        let mut byte = [0u8; 1];
        match self.input.read(&mut byte) {
            Ok(1) => {
                for i in 0..8 {
                    self.pending_input_bits.push_back((byte[0] >> i) & 1 == 1);
                }
                self.pending_input_bits.pop_front().unwrap_or(false)
            }
            _ => {
                self.input_exhausted = true;
                false
            }
        }
    }
}

/// Narrows a [`BigInt`] word read from memory down to a native address for
/// comparison against the reserved I/O addresses. Values within the
/// configured width always fit in `u128`.
trait ToU128Addr {
    fn to_u128_addr(&self) -> u128;
}

impl ToU128Addr for BigInt {
    fn to_u128_addr(&self) -> u128 {
        self.to_u128().unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::Memory;
    use num_bigint::BigInt;

    fn write_op(mem: &mut Memory, ip: u128, width: u32, a: u128, b: u128) {
        mem.write_word(ip, width, &BigInt::from(a));
        mem.write_word(ip + width as u128, width, &BigInt::from(b));
    }

    #[test]
    fn self_loop_halts_immediately() {
        let mut mem = Memory::new();
        write_op(&mut mem, 0, 8, 0, 0);
        let mut vm = Vm::new(mem, 0, IoAddresses::new(1000), VmConfig::default(), Vec::new(), std::io::empty());
        let reason = vm.run().unwrap();
        assert_eq!(reason, StopReason::Halted);
        assert_eq!(vm.step_count(), 1);
    }

    #[test]
    fn output_bits_group_into_bytes_lsb_first() {
        let mut mem = Memory::new();
        let io = IoAddresses::new(1000);
        let width = 8u32;
        // Emit the bit pattern for 'A' (0x41 = 0b01000001) LSB-first, then halt.
        let bits = [1u8, 0, 0, 0, 0, 0, 1, 0];
        let mut ip = 0u128;
        for &bit in &bits {
            let target = if bit == 1 { io.output_one() } else { io.output_zero() };
            write_op(&mut mem, ip, width, target, ip + width as u128);
            ip += width as u128;
        }
        write_op(&mut mem, ip, width, 0, ip);

        let mut out = Vec::new();
        {
            let mut vm = Vm::new(mem, 0, io, VmConfig::default(), &mut out, std::io::empty());
            let reason = vm.run().unwrap();
            assert_eq!(reason, StopReason::Halted);
        }
        assert_eq!(out, vec![0x41]);
    }

    #[test]
    fn step_limit_is_enforced() {
        let mut mem = Memory::new();
        write_op(&mut mem, 0, 8, 2, 8);
        write_op(&mut mem, 8, 8, 2, 0);
        let config = VmConfig {
            step_limit: 3,
            ..VmConfig::default()
        };
        let mut vm = Vm::new(mem, 0, IoAddresses::new(1000), config, Vec::new(), std::io::empty());
        let err = vm.run().unwrap_err();
        assert!(matches!(err, VmError::RunTimeExceeded));
    }

    #[test]
    fn breakpoint_stops_execution() {
        let mut mem = Memory::new();
        write_op(&mut mem, 0, 8, 2, 8);
        write_op(&mut mem, 8, 8, 2, 8);
        let mut vm = Vm::new(mem, 0, IoAddresses::new(1000), VmConfig::default(), Vec::new(), std::io::empty());
        vm.add_breakpoint(8, "loop_top");
        let reason = vm.run().unwrap();
        assert_eq!(reason, StopReason::Breakpoint);
        assert_eq!(vm.ip(), 8);
    }
}
