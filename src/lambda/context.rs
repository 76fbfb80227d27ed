use crate::value::{Value, Values};

/// Per-lambda stack of argument tuples read by predicate calls.
///
/// [`push`](Self::push) makes a tuple current, predicates read it with [`peek`](Self::peek)
/// without consuming it. When a callback fires, its lambda's stack is reset with
/// [`inherit`](Self::inherit) to the tuple that was current when the callback was registered,
/// so a callback that pushes nothing re-reads the same context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextStack {
    frames: Vec<Values>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, values: Values) {
        self.frames.push(values);
    }

    /// The current tuple, empty when nothing was pushed.
    pub fn peek(&self) -> &[Value] {
        self.frames.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pop(&mut self) -> Option<Values> {
        self.frames.pop()
    }

    /// Replaces the whole stack with a single inherited frame.
    pub fn inherit(&mut self, tuple: Values) {
        self.frames.clear();
        self.frames.push(tuple);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn peek_reads_without_consuming() {
        let mut stack = ContextStack::new();
        assert!(stack.peek().is_empty());

        stack.push(vec![Value::Fd(3)]);
        assert_eq!(stack.peek(), &[Value::Fd(3)]);
        assert_eq!(stack.peek(), &[Value::Fd(3)]);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn inherit_discards_pushed_frames() {
        let mut stack = ContextStack::new();
        stack.push(vec![Value::Int(1)]);
        stack.push(vec![Value::Int(2)]);

        stack.inherit(vec![Value::Fd(7)]);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.peek(), &[Value::Fd(7)]);

        assert_eq!(stack.pop(), Some(vec![Value::Fd(7)]));
        assert!(stack.is_empty());
    }

    proptest! {
        #[test]
        fn current_tuple_is_the_last_push(values in proptest::collection::vec(any::<i64>(), 1..32)) {
            let mut stack = ContextStack::new();
            for value in &values {
                stack.push(vec![Value::Int(*value)]);
                prop_assert_eq!(stack.peek(), &[Value::Int(*value)]);
            }

            for value in values.iter().rev() {
                prop_assert_eq!(stack.pop(), Some(vec![Value::Int(*value)]));
            }
            prop_assert!(stack.peek().is_empty());
        }
    }
}
