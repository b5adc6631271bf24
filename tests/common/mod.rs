//! A small Blockasm interpreter for end-to-end tests.
//!
//! Buffers are byte vectors; numeric instructions read them as big-endian
//! integers of up to eight bytes. Comment lines are no-ops but keep their
//! line number, like every other line.

#![allow(dead_code)]

use std::collections::HashMap;

use plc::{Assembly, CompileResult, Library, compile_with_rng};
use rand::rngs::mock::StepRng;

const STEP_LIMIT: usize = 100_000;

pub type State = HashMap<u64, Vec<u8>>;

#[derive(Debug, Default)]
pub struct Outcome {
  /// Value passed to `ExitBfr`, if the program left that way.
  pub exit: Option<Vec<u8>>,
  pub state: State,
  pub stdout: Vec<String>,
  pub stderr: Vec<String>,
}

impl Outcome {
  pub fn exit_value(&self) -> Option<u64> {
    self.exit.as_deref().map(number)
  }

  pub fn state_value(&self, addr: u64) -> Option<u64> {
    self.state.get(&addr).map(|bytes| number(bytes))
  }
}

/// Compile with deterministic function ids.
pub fn compile(source: &str, libraries: &[Library]) -> CompileResult<Assembly> {
  compile_with_rng(source, libraries, 0x1000, StepRng::new(0x100, 0x100))
}

pub fn number(bytes: &[u8]) -> u64 {
  assert!(bytes.len() <= 8, "buffer too wide for a number: {bytes:?}");
  bytes.iter().fold(0, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn encode(value: u64) -> Vec<u8> {
  value.to_be_bytes().to_vec()
}

fn slot(operand: &str) -> u32 {
  let digits = operand
    .strip_prefix("0x")
    .unwrap_or_else(|| panic!("expected a slot, got {operand}"));
  u32::from_str_radix(digits, 16).unwrap()
}

fn target(operand: &str) -> usize {
  operand
    .parse()
    .unwrap_or_else(|_| panic!("expected a line number, got {operand}"))
}

fn constant(operand: &str) -> Vec<u8> {
  let digits = operand.strip_prefix("0x").unwrap();
  (0..digits.len())
    .step_by(2)
    .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).unwrap())
    .collect()
}

struct Frame {
  return_to: usize,
  buffers: HashMap<u32, Vec<u8>>,
}

/// Run `text` against `state` until it exits or falls off the end.
pub fn run(text: &str, state: State) -> Outcome {
  let lines: Vec<&str> = text.lines().collect();
  let mut buffers: HashMap<u32, Vec<u8>> = HashMap::new();
  let mut frames: Vec<Frame> = Vec::new();
  let mut outcome = Outcome {
    state,
    ..Outcome::default()
  };
  let mut pc = 0;

  for _ in 0..STEP_LIMIT {
    let Some(line) = lines.get(pc) else {
      return outcome;
    };
    pc += 1;
    if line.starts_with(';') || line.trim().is_empty() {
      continue;
    }

    let line_no = pc - 1;
    let parts: Vec<&str> = line.split_whitespace().collect();
    let read = |buffers: &HashMap<u32, Vec<u8>>, operand: &str| -> Vec<u8> {
      buffers
        .get(&slot(operand))
        .cloned()
        .unwrap_or_else(|| panic!("line {line_no}: {operand} is not initialised"))
    };
    let value = |buffers: &HashMap<u32, Vec<u8>>, operand: &str| number(&read(buffers, operand));

    match parts[0] {
      "InitBfr" => {
        buffers.insert(slot(parts[1]), Vec::new());
      }
      "SetCnst" => {
        buffers.insert(slot(parts[1]), constant(parts[2]));
      }
      "CpyBfr" => {
        let src = read(&buffers, parts[1]);
        buffers.insert(slot(parts[2]), src);
      }
      "FreeBfr" => {
        buffers.remove(&slot(parts[1]));
      }
      "Add" | "Sub" | "Mul" | "Div" | "Exp" | "Less" => {
        let a = value(&buffers, parts[1]);
        let b = value(&buffers, parts[2]);
        let result = match parts[0] {
          "Add" => a.wrapping_add(b),
          "Sub" => a.wrapping_sub(b),
          "Mul" => a.wrapping_mul(b),
          "Div" => a.checked_div(b).unwrap_or(0),
          "Exp" => a.wrapping_pow(b as u32),
          _ => u64::from(a < b),
        };
        buffers.insert(slot(parts[3]), encode(result));
      }
      "Eq" => {
        let equal = read(&buffers, parts[1]) == read(&buffers, parts[2]);
        buffers.insert(slot(parts[3]), encode(u64::from(equal)));
      }
      "App" => {
        let src = read(&buffers, parts[2]);
        buffers.entry(slot(parts[1])).or_default().extend(src);
      }
      "Not" => {
        let zero = value(&buffers, parts[1]) == 0;
        buffers.insert(slot(parts[2]), encode(u64::from(zero)));
      }
      "Jmp" => pc = target(parts[1]),
      "JmpCond" => {
        if value(&buffers, parts[1]) != 0 {
          pc = target(parts[2]);
        }
      }
      "Call" => {
        frames.push(Frame {
          return_to: pc,
          buffers: buffers.clone(),
        });
        pc = target(parts[1]);
      }
      "Ret" => {
        let frame = frames.pop().expect("Ret without Call");
        let result = buffers.remove(&1);
        buffers = frame.buffers;
        if let Some(result) = result {
          buffers.insert(1, result);
        }
        pc = frame.return_to;
      }
      "UpdateState" => {
        let addr = value(&buffers, parts[1]);
        let val = read(&buffers, parts[2]);
        outcome.state.insert(addr, val);
      }
      "GetFromState" => {
        let addr = value(&buffers, parts[1]);
        let val = outcome.state.get(&addr).cloned().unwrap_or_default();
        buffers.insert(slot(parts[2]), val);
      }
      "ExitBfr" => {
        outcome.exit = Some(read(&buffers, parts[1]));
        return outcome;
      }
      "Exit" => return outcome,
      "Stdout" => {
        let out = value(&buffers, parts[1]).to_string();
        outcome.stdout.push(out);
      }
      "PrintStr" => {
        let out = String::from_utf8_lossy(&read(&buffers, parts[1])).into_owned();
        outcome.stdout.push(out);
      }
      "Stderr" => {
        let out = value(&buffers, parts[1]).to_string();
        outcome.stderr.push(out);
      }
      other => panic!("line {line_no}: unknown instruction {other}"),
    }
  }
  panic!("program did not finish within {STEP_LIMIT} steps");
}
