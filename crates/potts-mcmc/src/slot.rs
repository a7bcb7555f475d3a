/// Trial (`front`) and accepted (`back`) copies of a value.
///
/// After a Newton step completes `back` holds the accepted value and `front`
/// is free for the next trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoSlot<T> {
    front: T,
    back: T,
}

impl<T: Clone> TwoSlot<T> {
    /// Both slots hold `value`.
    pub fn new(value: T) -> Self {
        Self {
            front: value.clone(),
            back: value,
        }
    }

    /// Current trial value.
    pub fn front(&self) -> &T {
        &self.front
    }

    /// Last accepted value.
    pub fn back(&self) -> &T {
        &self.back
    }

    /// Replaces the trial value.
    pub fn set_front(&mut self, value: T) {
        self.front = value;
    }

    /// Replaces the accepted value.
    pub fn set_back(&mut self, value: T) {
        self.back = value;
    }

    /// Mutable trial value.
    pub fn front_mut(&mut self) -> &mut T {
        &mut self.front
    }

    /// Accepts the trial: `back <- front`.
    pub fn commit(&mut self) {
        self.back = self.front.clone();
    }

    /// Drops the trial: `front <- back`.
    pub fn discard(&mut self) {
        self.front = self.back.clone();
    }

    /// Exchanges the two slots.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Overwrites both slots.
    pub fn reset(&mut self, value: T) {
        self.front = value.clone();
        self.back = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_and_discard_move_values_in_opposite_directions() {
        let mut slot = TwoSlot::new(1);
        slot.set_front(2);
        slot.discard();
        assert_eq!((*slot.front(), *slot.back()), (1, 1));
        slot.set_front(3);
        slot.commit();
        assert_eq!((*slot.front(), *slot.back()), (3, 3));
        slot.set_front(4);
        slot.swap();
        assert_eq!((*slot.front(), *slot.back()), (3, 4));
    }
}
