//! Execution state (`spec.md` §4.E), grounded on `state.c`: globals array,
//! value stack with a frame pointer, history stack keyed by the marker's
//! 4-bit safety mask, and the reader/writer pair.

use std::io::{Read, Write};

use crate::error::RuntimeError;
use crate::reader::Reader;
use crate::tree::{marks, Value};
use crate::writer::Writer;

enum HistoryEntry {
    FpSentinel(usize),
    Input(u32),
    Output(u32),
    Globals(Vec<Value>),
    Frame(Vec<Value>),
}

/// `(save_input, save_output, save_globals, save_frame)` -- which of the
/// four dimensions are *not* covered by `mask` and so must be saved.
fn unsafe_dims(mask: u8) -> (bool, bool, bool, bool) {
    (
        mask & marks::I == 0,
        mask & marks::O == 0,
        mask & marks::G == 0,
        mask & marks::L == 0,
    )
}

pub struct State<R: Read, W: Write> {
    globals: Vec<Value>,
    n_mutables: usize,
    stack: Vec<Value>,
    fp: usize,
    history: Vec<HistoryEntry>,
    reader: Reader<R>,
    writer: Writer<W>,
}

/// Initial stack capacity; `new_frame` doubles it on overflow (`spec.md`
/// §4.E "Stack growth resizes with geometric doubling").
const INITIAL_STACK: usize = 256;

impl<R: Read, W: Write> State<R, W> {
    pub fn new(n_globals: usize, n_mutables: usize, input: R, output: W) -> Self {
        State {
            globals: vec![0; n_globals],
            n_mutables,
            stack: Vec::with_capacity(INITIAL_STACK),
            fp: 0,
            history: Vec::new(),
            reader: Reader::new(input),
            writer: Writer::new(output),
        }
    }

    pub fn reader(&mut self) -> &mut Reader<R> {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut Writer<W> {
        &mut self.writer
    }

    pub fn reader_tell(&self) -> u32 {
        self.reader.tell()
    }

    pub fn writer_tell(&self) -> u32 {
        self.writer.tell()
    }

    /// Flushes every buffered output byte to the sink. Must be called once
    /// interpretation has finished; a `State` dropped without it silently
    /// loses any still-buffered output.
    pub fn finish(self) -> Result<(), RuntimeError> {
        self.writer.close().map_err(|e| RuntimeError::Io(e.to_string()))
    }

    /// `index >= 0` addresses the current frame at `fp + index`; `index <
    /// 0` addresses the global array at `-1 - index` (`spec.md` §3
    /// "Variable reference").
    fn slot_mut(&mut self, index: i32) -> &mut Value {
        if index >= 0 {
            &mut self.stack[self.fp + index as usize]
        } else {
            let i = (-1 - index) as usize;
            &mut self.globals[i]
        }
    }

    fn slot(&self, index: i32) -> Value {
        if index >= 0 {
            self.stack[self.fp + index as usize]
        } else {
            let i = (-1 - index) as usize;
            self.globals[i]
        }
    }

    pub fn assign_index(&mut self, index: i32, value: Value) {
        *self.slot_mut(index) = value;
    }

    pub fn lookup_index(&self, index: i32) -> Value {
        self.slot(index)
    }

    /// Pushes a new frame of `frame_size` locals: the first `n_outs` slots
    /// zero-initialized, followed by the `inout_values` and `in_values` in
    /// that order, followed by zero-initialized scratch locals up to
    /// `frame_size`. The caller's `fp` is saved as a sentinel at `stack[new
    /// fp - 1]`... no -- kept out of band, restored explicitly by
    /// `old_frame`, since this Rust port threads `fp` as a plain field
    /// rather than an in-band stack sentinel.
    pub fn new_frame(&mut self, n_outs: usize, inout_values: &[Value], in_values: &[Value], frame_size: usize) -> usize {
        let caller_fp = self.fp;
        let new_fp = self.stack.len();
        self.stack.resize(new_fp + frame_size, 0);
        for (i, &v) in inout_values.iter().enumerate() {
            self.stack[new_fp + n_outs + i] = v;
        }
        for (i, &v) in in_values.iter().enumerate() {
            self.stack[new_fp + n_outs + inout_values.len() + i] = v;
        }
        self.fp = new_fp;
        caller_fp
    }

    /// Pops the current frame, restoring `fp` to `caller_fp`. If `succeeded`,
    /// copies the frame's out slots (`0..n_outs`) and inout slots
    /// (`n_outs..n_outs+n_inouts`) back into the caller-named variables.
    pub fn old_frame(&mut self, caller_fp: usize, outs: &[i32], inouts: &[i32], succeeded: bool) {
        if succeeded {
            let base = self.fp;
            for (i, &target) in outs.iter().enumerate() {
                let v = self.stack[base + i];
                self.assign_to(target, v);
            }
            for (i, &target) in inouts.iter().enumerate() {
                let v = self.stack[base + outs.len() + i];
                self.assign_to(target, v);
            }
        }
        self.stack.truncate(self.fp);
        self.fp = caller_fp;
    }

    /// Like `old_frame`, but for an expression-form call: returns the
    /// single out slot's value directly instead of writing it back through
    /// a `VarRef` (`spec.md` §4.H "CALL (expression form)"). `n_outs` is the
    /// callee's declared out count (0 or 1 -- an expression-form call has at
    /// most one out, per the annotator's `sig_matches`), not a guess from
    /// the frame's size: a 0-out callee can still have inouts or locals
    /// occupying `stack[base]`, which must never be mistaken for an out.
    pub fn old_frame_result(&mut self, caller_fp: usize, n_outs: usize, inouts: &[i32], succeeded: bool) -> Option<Value> {
        let base = self.fp;
        let result = if succeeded && n_outs > 0 { Some(self.stack[base]) } else { None };
        if succeeded {
            for (i, &target) in inouts.iter().enumerate() {
                let v = self.stack[base + n_outs + i];
                self.assign_to(target, v);
            }
        }
        self.stack.truncate(self.fp);
        self.fp = caller_fp;
        result
    }

    fn assign_to(&mut self, index: i32, value: Value) {
        *self.slot_mut(index) = value;
    }

    pub fn save(&mut self, mask: u8) {
        tracing::trace!(mask, "save");
        self.history.push(HistoryEntry::FpSentinel(self.fp));
        let (i, o, g, l) = unsafe_dims(mask);
        if i {
            self.history.push(HistoryEntry::Input(self.reader.tell()));
        }
        if o {
            self.history.push(HistoryEntry::Output(self.writer.tell()));
        }
        if g {
            self.history.push(HistoryEntry::Globals(self.globals[..self.n_mutables].to_vec()));
        }
        if l {
            self.history.push(HistoryEntry::Frame(self.stack[self.fp..].to_vec()));
        }
    }

    pub fn restore(&mut self, mask: u8) -> Result<(), RuntimeError> {
        tracing::trace!(mask, "restore");
        let (i, o, g, l) = unsafe_dims(mask);
        if l {
            match self.history.pop() {
                Some(HistoryEntry::Frame(frame)) => {
                    self.stack.truncate(self.fp);
                    self.stack.extend(frame);
                }
                _ => return Err(RuntimeError::SentinelMismatch),
            }
        }
        if g {
            match self.history.pop() {
                Some(HistoryEntry::Globals(g)) => {
                    self.globals[..self.n_mutables].copy_from_slice(&g);
                }
                _ => return Err(RuntimeError::SentinelMismatch),
            }
        }
        if o {
            match self.history.pop() {
                Some(HistoryEntry::Output(pos)) => {
                    self.writer.seek(pos).map_err(|e| RuntimeError::Io(e.to_string()))?;
                }
                _ => return Err(RuntimeError::SentinelMismatch),
            }
        }
        if i {
            match self.history.pop() {
                Some(HistoryEntry::Input(pos)) => {
                    self.reader.seek(pos);
                }
                _ => return Err(RuntimeError::SentinelMismatch),
            }
        }
        match self.history.pop() {
            Some(HistoryEntry::FpSentinel(f)) if f == self.fp => Ok(()),
            _ => Err(RuntimeError::SentinelMismatch),
        }
    }

    pub fn discard(&mut self, mask: u8) -> Result<(), RuntimeError> {
        tracing::trace!(mask, "discard");
        let (i, o, g, l) = unsafe_dims(mask);
        if l && !matches!(self.history.pop(), Some(HistoryEntry::Frame(_))) {
            return Err(RuntimeError::SentinelMismatch);
        }
        if g && !matches!(self.history.pop(), Some(HistoryEntry::Globals(_))) {
            return Err(RuntimeError::SentinelMismatch);
        }
        if o && !matches!(self.history.pop(), Some(HistoryEntry::Output(_))) {
            return Err(RuntimeError::SentinelMismatch);
        }
        if i && !matches!(self.history.pop(), Some(HistoryEntry::Input(_))) {
            return Err(RuntimeError::SentinelMismatch);
        }
        match self.history.pop() {
            Some(HistoryEntry::FpSentinel(f)) if f == self.fp => Ok(()),
            _ => Err(RuntimeError::SentinelMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn state(n_globals: usize, n_mutables: usize) -> State<Cursor<Vec<u8>>, Vec<u8>> {
        State::new(n_globals, n_mutables, Cursor::new(Vec::new()), Vec::new())
    }

    #[test]
    fn frame_round_trips_out_values_on_success() {
        let mut st = state(1, 1);
        let caller_fp = st.new_frame(1, &[], &[], 1);
        st.assign_index(0, 99);
        st.old_frame(caller_fp, &[-1], &[], true);
        assert_eq!(st.lookup_index(-1), 99);
    }

    #[test]
    fn frame_does_not_write_back_on_failure() {
        let mut st = state(1, 1);
        let caller_fp = st.new_frame(1, &[], &[], 1);
        st.assign_index(0, 99);
        st.old_frame(caller_fp, &[-1], &[], false);
        assert_eq!(st.lookup_index(-1), 0);
    }

    #[test]
    fn save_restore_reverts_a_global_mutation() {
        let mut st = state(1, 1);
        st.assign_index(-1, 7);
        st.save(marks::ALL & !marks::G);
        st.assign_index(-1, 8);
        st.restore(marks::ALL & !marks::G).unwrap();
        assert_eq!(st.lookup_index(-1), 7);
    }

    #[test]
    fn save_discard_keeps_the_mutation() {
        let mut st = state(1, 1);
        st.assign_index(-1, 7);
        st.save(marks::ALL & !marks::G);
        st.assign_index(-1, 8);
        st.discard(marks::ALL & !marks::G).unwrap();
        assert_eq!(st.lookup_index(-1), 8);
    }

    #[test]
    fn fully_safe_mask_only_pushes_the_sentinel() {
        let mut st = state(0, 0);
        st.save(marks::ALL);
        assert_eq!(st.history.len(), 1);
        st.discard(marks::ALL).unwrap();
        assert!(st.history.is_empty());
    }
}
