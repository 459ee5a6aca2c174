//! The synthetic workload: one kernel pass of the Dhrystone procedure chain.
//!
//! All mutable "global" data lives in [`RunState`], which the driver builds
//! fresh for every run. A pass performs the same fixed amount of work every
//! time, so the order of every read and write below is part of the score.

use std::hint::black_box;

use crate::error::KernelFault;
use crate::record::{Ident, Record, RecordArena, RecordId};

/// Side length of the global arrays.
pub const ARRAY_DIM: usize = 51;

pub const STRING_1: &str = "DHRYSTONE PROGRAM, 1'ST STRING";
pub const STRING_2: &str = "DHRYSTONE PROGRAM, 2'ND STRING";
pub const STRING_GLOBAL: &str = "DHRYSTONE PROGRAM, SOME STRING";

type KernelResult<T> = Result<T, KernelFault>;

/// Scalars, arrays and records mutated by the workload during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub int_glob: i64,
    pub bool_glob: bool,
    pub char1_glob: char,
    pub char2_glob: char,
    pub array1_glob: [i64; ARRAY_DIM],
    pub array2_glob: Box<[[i64; ARRAY_DIM]; ARRAY_DIM]>,
    pub records: RecordArena,
    pub ptr_glb: Option<RecordId>,
    /// Completed kernel passes since the last reset.
    pub passes: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            int_glob: 0,
            bool_glob: false,
            char1_glob: '\0',
            char2_glob: '\0',
            array1_glob: [0; ARRAY_DIM],
            array2_glob: Box::new([[0; ARRAY_DIM]; ARRAY_DIM]),
            records: RecordArena::new(),
            ptr_glb: None,
            passes: 0,
        }
    }

    /// Creates the two persistent records and seeds the 2D array.
    pub fn link_records(&mut self) {
        let next = RecordId::SECOND;
        let glb = RecordId::FIRST;

        self.records.set(next, Record::default());
        self.records.set(
            glb,
            Record::create(Some(next), Ident::Ident1, Ident::Ident3, 40, STRING_GLOBAL),
        );
        self.ptr_glb = Some(glb);
        self.array2_glob[8][7] = 10;
    }

    /// Executes one full pass of the workload.
    pub fn pass(&mut self) -> KernelResult<()> {
        self.proc5();
        self.proc4();

        let mut int_loc1: i64 = 2;
        let int_loc2: i64 = 3;
        let mut int_loc3: i64 = 0;
        let mut enum_loc = Ident::Ident2;
        self.bool_glob = !func2(STRING_1, STRING_2)?;

        while int_loc1 < int_loc2 {
            black_box(5 * int_loc1 - int_loc2);
            int_loc3 = proc7(int_loc1, int_loc2)?;
            int_loc1 += 1;
        }

        self.proc8(int_loc1, int_loc3)?;
        let glb = self.ptr_glb.ok_or(KernelFault::MissingRecord)?;
        self.ptr_glb = Some(self.proc1(glb)?);

        let mut char_index = 'A';
        while char_index <= self.char2_glob {
            if enum_loc == func1(char_index, 'C') {
                enum_loc = self.proc6(Ident::Ident1);
            }
            char_index = char::from_u32(u32::from(char_index) + 1)
                .ok_or(KernelFault::Overflow("character range"))?;
        }

        let int_loc3 = int_loc2
            .checked_mul(int_loc1)
            .ok_or(KernelFault::Overflow("main loop"))?;
        let int_loc2 = floor_div(int_loc3, int_loc1, "main loop")?;
        let int_loc2 = 7 * (int_loc3 - int_loc2) - int_loc1;
        let int_loc1 = self.proc2(int_loc1)?;
        black_box((int_loc1, int_loc2, int_loc3, enum_loc));

        self.passes += 1;
        Ok(())
    }

    /// Relinks the record at `ptr_par_in` through a copy of the global record.
    ///
    /// Only ever called with the global record itself; the copy is written to
    /// the other arena slot.
    pub fn proc1(&mut self, ptr_par_in: RecordId) -> KernelResult<RecordId> {
        let glb = self.ptr_glb.ok_or(KernelFault::MissingRecord)?;
        debug_assert_eq!(ptr_par_in, glb);
        let next = RecordArena::other(ptr_par_in);

        let next_record = self.records.get(glb).copy();
        self.records.set(next, next_record);
        self.records.get_mut(ptr_par_in).ptr_comp = Some(next);
        self.records.get_mut(ptr_par_in).int_comp = 5;

        let par_in = *self.records.get(ptr_par_in);
        self.records.get_mut(next).int_comp = par_in.int_comp;
        self.records.get_mut(next).ptr_comp = par_in.ptr_comp;
        let relinked = self.proc3(self.records.get(next).ptr_comp)?;
        self.records.get_mut(next).ptr_comp = relinked;

        let result = if self.records.get(next).discr == Ident::Ident1 {
            self.records.get_mut(next).int_comp = 6;
            let enum_comp = self.proc6(self.records.get(ptr_par_in).enum_comp);
            self.records.get_mut(next).enum_comp = enum_comp;
            let glb_ptr = self.records.get(glb).ptr_comp;
            self.records.get_mut(next).ptr_comp = glb_ptr;
            let int_comp = proc7(self.records.get(next).int_comp, 10)?;
            self.records.get_mut(next).int_comp = int_comp;
            ptr_par_in
        } else {
            let replacement = self.records.get(next).copy();
            self.records.set(ptr_par_in, replacement);
            ptr_par_in
        };

        self.records.get_mut(next).ptr_comp = None;
        Ok(result)
    }

    pub fn proc2(&self, mut int_par_io: i64) -> KernelResult<i64> {
        let mut int_loc = int_par_io + 10;
        let mut enum_loc = None;
        loop {
            if self.char1_glob == 'A' {
                int_loc -= 1;
                int_par_io = int_loc - self.int_glob;
                enum_loc = Some(Ident::Ident1);
            }
            if enum_loc.ok_or(KernelFault::UnassignedEnum)? == Ident::Ident1 {
                break;
            }
        }
        Ok(int_par_io)
    }

    pub fn proc3(&mut self, ptr_par_out: Option<RecordId>) -> KernelResult<Option<RecordId>> {
        let mut ptr_par_out = ptr_par_out;
        match self.ptr_glb {
            Some(glb) => ptr_par_out = self.records.get(glb).ptr_comp,
            None => self.int_glob = 100,
        }
        let glb = self.ptr_glb.ok_or(KernelFault::MissingRecord)?;
        self.records.get_mut(glb).int_comp = proc7(10, self.int_glob)?;
        Ok(ptr_par_out)
    }

    pub fn proc4(&mut self) {
        let bool_loc = self.char1_glob == 'A';
        let bool_loc = bool_loc || self.bool_glob;
        black_box(bool_loc);
        self.char2_glob = 'B';
    }

    pub fn proc5(&mut self) {
        self.char1_glob = 'A';
        self.bool_glob = false;
    }

    pub fn proc6(&self, enum_par_in: Ident) -> Ident {
        let mut enum_par_out = enum_par_in;
        if !func3(enum_par_in) {
            enum_par_out = Ident::Ident4;
        }

        match enum_par_in {
            Ident::Ident1 => enum_par_out = Ident::Ident1,
            Ident::Ident2 => {
                enum_par_out = if self.int_glob > 100 {
                    Ident::Ident1
                } else {
                    Ident::Ident4
                }
            }
            Ident::Ident3 => enum_par_out = Ident::Ident2,
            Ident::Ident4 => {}
            Ident::Ident5 => enum_par_out = Ident::Ident3,
        }
        enum_par_out
    }

    pub fn proc8(&mut self, int_par_i1: i64, int_par_i2: i64) -> KernelResult<()> {
        let int_loc = int_par_i1 + 5;
        let loc = slot(int_loc)?;

        self.array1_glob[loc] = int_par_i2;
        self.array1_glob[slot(int_loc + 1)?] = self.array1_glob[loc];
        self.array1_glob[slot(int_loc + 30)?] = int_loc;

        for int_index in int_loc..int_loc + 2 {
            self.array2_glob[loc][slot(int_index)?] = int_loc;
        }

        let before = slot(int_loc - 1)?;
        self.array2_glob[loc][before] = self.array2_glob[loc][before]
            .checked_add(1)
            .ok_or(KernelFault::Overflow("proc8"))?;
        self.array2_glob[slot(int_loc + 20)?][loc] = self.array1_glob[loc];
        self.int_glob = 5;
        Ok(())
    }
}

pub fn proc7(int_par_i1: i64, int_par_i2: i64) -> KernelResult<i64> {
    let int_loc = int_par_i1
        .checked_add(2)
        .ok_or(KernelFault::Overflow("proc7"))?;
    int_par_i2
        .checked_add(int_loc)
        .ok_or(KernelFault::Overflow("proc7"))
}

pub fn func1(char_par1: char, char_par2: char) -> Ident {
    let char_loc1 = char_par1;
    let char_loc2 = char_loc1;
    if char_loc2 != char_par2 {
        Ident::Ident1
    } else {
        Ident::Ident2
    }
}

pub fn func2(str_par_i1: &str, str_par_i2: &str) -> KernelResult<bool> {
    let mut int_loc: i64 = 1;
    let mut char_loc = None;
    while int_loc <= 1 {
        let left = char_at(str_par_i1, int_loc)?;
        let right = char_at(str_par_i2, int_loc + 1)?;
        if func1(left, right) != Ident::Ident1 {
            return Err(KernelFault::StalledComparison);
        }
        char_loc = Some('A');
        int_loc += 1;
    }
    let char_loc = char_loc.ok_or(KernelFault::StalledComparison)?;

    if ('W'..='Z').contains(&char_loc) {
        int_loc = 7;
    }

    let result = if char_loc == 'X' {
        true
    } else if str_par_i1 > str_par_i2 {
        int_loc += 7;
        true
    } else {
        false
    };
    black_box(int_loc);
    Ok(result)
}

/// Unconditionally false in the scored workload.
pub fn func3(_enum_par_in: Ident) -> bool {
    false
}

fn slot(index: i64) -> KernelResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < ARRAY_DIM)
        .ok_or(KernelFault::IndexOutOfRange { index })
}

fn char_at(s: &str, index: i64) -> KernelResult<char> {
    usize::try_from(index)
        .ok()
        .and_then(|i| s.as_bytes().get(i))
        .map(|&b| char::from(b))
        .ok_or(KernelFault::IndexOutOfRange { index })
}

fn floor_div(lhs: i64, rhs: i64, site: &'static str) -> KernelResult<i64> {
    if rhs == 0 {
        return Err(KernelFault::DivisionByZero(site));
    }
    let quotient = lhs.checked_div(rhs).ok_or(KernelFault::Overflow(site))?;
    if lhs % rhs != 0 && ((lhs < 0) != (rhs < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}
