//! Argument windows over the thread-local argument stack.

use std::{fmt, marker::PhantomData};

use object::{CellRef, Value};

use crate::{
    Env, Error, VmResult, arg_stack,
    objects::{ArrayObject, HashObject, inspect, symbol_name_is},
};

/// How `check_keyword_args` treats keywords it was not told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordRestType {
    /// Unknown keywords are an error.
    None,
    /// `**rest`: unknown keywords are collected.
    Present,
    /// `**nil`: no keyword may be passed at all.
    Forbidden,
}

/// One call's arguments: a window onto the suffix of the thread's argument
/// stack that was pushed for it.
///
/// `shift` and `pop` narrow the current window without moving data. Dropping
/// an `Args` truncates the stack back to where it stood at construction, on
/// every exit path. Moving it hands that duty to the new owner.
pub struct Args {
    start: usize,
    size: usize,
    original_start: usize,
    original_size: usize,
    /// The last value of the current window is a keyword hash.
    keyword_hash: bool,
    _thread: PhantomData<*const ()>,
}

impl Args {
    /// Pushes `values`. With `has_keyword_hash` the last one is the keyword hash.
    pub fn new(values: &[Value], has_keyword_hash: bool) -> Self {
        debug_assert!(
            !has_keyword_hash || !values.is_empty(),
            "keyword hash flagged on an empty argument list"
        );
        let start = arg_stack::extend(values);
        Self::window(start, values.len(), has_keyword_hash)
    }

    pub fn empty() -> Self {
        Self::new(&[], false)
    }

    pub fn from_array(array: &ArrayObject, has_keyword_hash: bool) -> Self {
        Self::new(&array.to_vec(), has_keyword_hash)
    }

    fn window(start: usize, size: usize, keyword_hash: bool) -> Self {
        Self {
            start,
            size,
            original_start: start,
            original_size: size,
            keyword_hash,
            _thread: PhantomData,
        }
    }

    /// A fresh window holding a copy of the current one.
    pub fn copy(&self) -> Self {
        let start = arg_stack::extend_from_within(self.range());
        Self::window(start, self.size, self.keyword_hash)
    }

    // ── Window ─────────────────────────────────────────────────────────

    fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.size
    }

    pub fn size(&self, include_keyword_hash: bool) -> usize {
        if self.keyword_hash && !include_keyword_hash {
            self.size - 1
        } else {
            self.size
        }
    }

    /// Positional arguments left in the window.
    pub fn len(&self) -> usize {
        self.size(false)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn original_size(&self) -> usize {
        self.original_size
    }

    pub fn start_index(&self) -> usize {
        self.start
    }

    pub fn original_start_index(&self) -> usize {
        self.original_start
    }

    pub fn has_keyword_hash(&self) -> bool {
        self.keyword_hash
    }

    // ── Access ─────────────────────────────────────────────────────────

    /// The value at `index` of the current window, keyword hash included.
    ///
    /// # Panics
    /// If `index` is outside the window.
    pub fn get(&self, index: usize) -> Value {
        assert!(
            index < self.size,
            "argument index {index} out of range for window of {}",
            self.size
        );
        arg_stack::get(self.start + index)
    }

    pub fn at(&self, index: usize) -> VmResult<Value> {
        if index < self.size {
            Ok(self.get(index))
        } else {
            Err(Error::argument(format!(
                "wrong number of arguments (given {}, expected {}+)",
                self.size,
                index + 1
            )))
        }
    }

    pub fn at_or(&self, index: usize, default: Value) -> Value {
        if index < self.size {
            self.get(index)
        } else {
            default
        }
    }

    /// Positional argument at `index`, never the keyword hash.
    pub fn maybe_at(&self, index: usize) -> Option<Value> {
        (index < self.size(false)).then(|| self.get(index))
    }

    pub fn first(&self) -> Option<Value> {
        (self.size > 0).then(|| self.get(0))
    }

    pub fn last(&self) -> Option<Value> {
        (self.size > 0).then(|| self.get(self.size - 1))
    }

    pub fn values(&self, include_keyword_hash: bool) -> Vec<Value> {
        arg_stack::to_vec(self.start..self.start + self.size(include_keyword_hash))
    }

    // ── Consumption ────────────────────────────────────────────────────

    /// Removes the first value of the window.
    ///
    /// # Panics
    /// If nothing is left to shift. Check the arity first.
    pub fn shift(&mut self, include_keyword_hash: bool) -> Value {
        assert!(
            self.size(include_keyword_hash) > 0,
            "shift on an exhausted argument window"
        );
        let value = arg_stack::get(self.start);
        self.start += 1;
        self.size -= 1;
        if self.size == 0 {
            self.keyword_hash = false;
        }
        value
    }

    /// Removes the last value of the window. Without `include_keyword_hash`
    /// the last positional value is taken and the keyword hash moves down
    /// into its slot.
    ///
    /// # Panics
    /// If nothing is left to pop. Check the arity first.
    pub fn pop(&mut self, include_keyword_hash: bool) -> Value {
        assert!(
            self.size(include_keyword_hash) > 0,
            "pop on an exhausted argument window"
        );
        let last = self.start + self.size - 1;
        if self.keyword_hash && !include_keyword_hash {
            let value = arg_stack::get(last - 1);
            arg_stack::set(last - 1, arg_stack::get(last));
            self.size -= 1;
            value
        } else {
            self.keyword_hash = false;
            self.size -= 1;
            arg_stack::get(last)
        }
    }

    // ── Arity ──────────────────────────────────────────────────────────

    pub fn ensure_argc_is(
        &self,
        expected: usize,
        has_keywords: bool,
        keywords: &[&str],
    ) -> VmResult<()> {
        let given = self.size(false);
        if given == expected {
            return Ok(());
        }
        Err(Error::argument(format!(
            "wrong number of arguments (given {given}, expected {expected}{})",
            Self::argc_error_suffix(has_keywords, keywords)
        )))
    }

    pub fn ensure_argc_between(
        &self,
        low: usize,
        high: usize,
        has_keywords: bool,
        keywords: &[&str],
    ) -> VmResult<()> {
        let given = self.size(false);
        if (low..=high).contains(&given) {
            return Ok(());
        }
        Err(Error::argument(format!(
            "wrong number of arguments (given {given}, expected {low}..{high}{})",
            Self::argc_error_suffix(has_keywords, keywords)
        )))
    }

    pub fn ensure_argc_at_least(
        &self,
        expected: usize,
        has_keywords: bool,
        keywords: &[&str],
    ) -> VmResult<()> {
        let given = self.size(false);
        if given >= expected {
            return Ok(());
        }
        Err(Error::argument(format!(
            "wrong number of arguments (given {given}, expected {expected}+{})",
            Self::argc_error_suffix(has_keywords, keywords)
        )))
    }

    /// `; required keyword: a` style tail naming the declared keywords.
    pub fn argc_error_suffix(has_keywords: bool, keywords: &[&str]) -> String {
        match (has_keywords, keywords) {
            (false, _) | (true, []) => String::new(),
            (true, [keyword]) => format!("; required keyword: {keyword}"),
            (true, keywords) => format!("; required keywords: {}", keywords.join(", ")),
        }
    }

    // ── Keywords ───────────────────────────────────────────────────────

    pub fn keyword_hash(&self) -> Option<CellRef> {
        if !self.keyword_hash {
            return None;
        }
        self.last().and_then(Value::as_cell)
    }

    pub fn check_keyword_args(
        &self,
        required: &[&str],
        optional: &[&str],
        rest: KeywordRestType,
    ) -> VmResult<()> {
        let entries = match self.keyword_hash() {
            Some(cell) => cell
                .downcast::<HashObject>()
                .map(HashObject::entries)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if rest == KeywordRestType::Forbidden && !entries.is_empty() {
            return Err(Error::argument("no keywords accepted"));
        }

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !entries.iter().any(|&(key, _)| symbol_name_is(key, name)))
            .collect();
        if !missing.is_empty() {
            return Err(Error::argument(keyword_list_message("missing", &missing)));
        }

        if rest == KeywordRestType::None {
            let unknown: Vec<String> = entries
                .iter()
                .filter(|&&(key, _)| {
                    !required
                        .iter()
                        .chain(optional)
                        .any(|name| symbol_name_is(key, name))
                })
                .map(|&(key, _)| inspect(key))
                .collect();
            if !unknown.is_empty() {
                let names: Vec<&str> = unknown.iter().map(String::as_str).collect();
                return Err(Error::argument(keyword_list_message("unknown", &names)));
            }
        }
        Ok(())
    }

    /// The keyword argument `name`, or nil when it was not passed.
    pub fn keyword_arg(&self, env: &Env<'_>, name: &str) -> Value {
        self.keyword_lookup(name).unwrap_or_else(|| env.nil())
    }

    pub fn keyword_arg_present(&self, name: &str) -> bool {
        self.keyword_lookup(name).is_some()
    }

    fn keyword_lookup(&self, name: &str) -> Option<Value> {
        let cell = self.keyword_hash()?;
        cell.downcast::<HashObject>()?.get_symbol(name)
    }

    /// A new hash of every keyword argument not named in `except`.
    pub fn keyword_arg_rest(&self, env: &Env<'_>, except: &[&str]) -> CellRef {
        let entries = match self.keyword_hash() {
            Some(cell) => cell
                .downcast::<HashObject>()
                .map(HashObject::entries)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let rest = entries
            .into_iter()
            .filter(|&(key, _)| !except.iter().any(|name| symbol_name_is(key, name)))
            .collect();
        env.allocate(HashObject::from_entries(rest))
    }

    /// Takes the keyword hash out of the window.
    pub fn pop_keyword_hash(&mut self) -> Option<CellRef> {
        let hash = self.keyword_hash()?;
        self.pop(true);
        Some(hash)
    }

    /// Drops a trailing keyword hash that holds no entries.
    pub fn pop_empty_keyword_hash(&mut self) {
        let is_empty = self
            .keyword_hash()
            .and_then(|cell| cell.downcast::<HashObject>().map(HashObject::is_empty))
            .unwrap_or(false);
        if is_empty {
            self.pop(true);
        }
    }

    // ── Materialization ────────────────────────────────────────────────

    pub fn to_array(&self, env: &Env<'_>, include_keyword_hash: bool) -> CellRef {
        env.allocate(ArrayObject::new(self.values(include_keyword_hash)))
    }

    /// Arguments as a block sees them: a lone array is spread across a block
    /// declaring more than one parameter, missing values become nil and
    /// extra ones are dropped.
    pub fn to_array_for_block(
        &self,
        env: &Env<'_>,
        min: usize,
        max: Option<usize>,
        autosplat: bool,
        include_keyword_hash: bool,
    ) -> CellRef {
        let mut values = self.values(include_keyword_hash);
        if autosplat && min > 1 && values.len() == 1 {
            if let Some(cell) = values[0].as_cell() {
                if let Some(array) = cell.downcast::<ArrayObject>() {
                    values = array.to_vec();
                }
            }
        }
        if let Some(max) = max {
            values.truncate(max);
        }
        if values.len() < min {
            values.resize(min, env.nil());
        }
        env.allocate(ArrayObject::new(values))
    }
}

fn keyword_list_message(kind: &str, names: &[&str]) -> String {
    let names: Vec<String> = names
        .iter()
        .map(|name| {
            if name.starts_with(':') {
                name.to_string()
            } else {
                format!(":{name}")
            }
        })
        .collect();
    let plural = if names.len() == 1 { "" } else { "s" };
    format!("{kind} keyword{plural}: {}", names.join(", "))
}

impl Drop for Args {
    fn drop(&mut self) {
        arg_stack::truncate(self.original_start);
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("window", &self.range())
            .field("original_start", &self.original_start)
            .field("keyword_hash", &self.keyword_hash)
            .field("values", &arg_stack::to_vec(self.range()))
            .finish()
    }
}
