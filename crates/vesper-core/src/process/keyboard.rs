use crate::config::KEYBOARD_BUFFER_SIZE;

/// Per-process ring of pending keystrokes. Pushing onto a full ring
/// overwrites the oldest unread key.
pub struct KeyboardBuffer {
    keys: [u8; KEYBOARD_BUFFER_SIZE],
    head: usize,
    tail: usize,
}

impl KeyboardBuffer {
    pub const fn new() -> Self {
        Self {
            keys: [0; KEYBOARD_BUFFER_SIZE],
            head: 0,
            tail: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    /// NUL is not a key and is dropped.
    pub fn push(&mut self, key: u8) {
        if key == 0 {
            return;
        }
        self.keys[self.tail % KEYBOARD_BUFFER_SIZE] = key;
        self.tail += 1;
        if self.tail - self.head > KEYBOARD_BUFFER_SIZE {
            self.head = self.tail - KEYBOARD_BUFFER_SIZE;
        }
    }

    /// Next unread key, or 0 when there is none.
    pub fn pop(&mut self) -> u8 {
        if self.is_empty() {
            return 0;
        }
        let key = self.keys[self.head % KEYBOARD_BUFFER_SIZE];
        self.keys[self.head % KEYBOARD_BUFFER_SIZE] = 0;
        self.head += 1;
        key
    }

    /// Drops the most recently pushed unread key.
    pub fn backspace(&mut self) {
        if self.is_empty() {
            return;
        }
        self.tail -= 1;
        self.keys[self.tail % KEYBOARD_BUFFER_SIZE] = 0;
    }
}

impl Default for KeyboardBuffer {
    fn default() -> Self {
        Self::new()
    }
}
