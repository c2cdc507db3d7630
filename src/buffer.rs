use crate::hooks::ByteSink;
use core::borrow::{Borrow, BorrowMut};
use core::{cmp, ptr};

/// A mediocre buffer that allows for block access without extra copies but memmoves more than
/// necessary.
///
/// wpos points to the first byte that can be written rpos points at the next byte that can be read
///
/// invariants: 0 <= rpos <= wpos <= data.len()
pub struct Buffer<S: BorrowMut<[u8]>> {
    store: S,
    rpos: usize,
    wpos: usize,
}

impl<S: BorrowMut<[u8]>> Buffer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            rpos: 0,
            wpos: 0,
        }
    }

    // Clears the buffer
    pub fn clear(&mut self) {
        self.rpos = 0;
        self.wpos = 0;
    }

    // Amount of bytes available for reading
    pub fn available_read(&self) -> usize {
        self.wpos - self.rpos
    }

    // Amount of space in bytes available for writing
    pub fn available_write(&self) -> usize {
        self.available_write_without_discard() + self.rpos
    }

    fn available_write_without_discard(&self) -> usize {
        self.store.borrow().len() - self.wpos
    }

    // Writes as much as possible of data to the buffer and returns the number of bytes written
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.len() > self.available_write_without_discard() && self.rpos > 0 {
            // data doesn't fit in already available space, and there is data to discard
            self.discard_already_read_data();
        }

        let count = cmp::min(self.available_write_without_discard(), data.len());
        if count == 0 {
            // Buffer is full (or data is empty)
            return 0;
        }

        self.store.borrow_mut()[self.wpos..self.wpos + count].copy_from_slice(&data[..count]);

        self.wpos += count;
        count
    }

    // Takes up to max_count bytes from the buffer and passes a slice pointing to them to a closure
    // for reading. The closure should return the number of bytes actually read and is allowed to
    // read less than max_bytes, including none at all. If the callback returns an error, the data
    // is not discarded from the buffer.
    pub fn read<E>(
        &mut self,
        max_count: usize,
        f: impl FnOnce(&[u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let count = cmp::min(max_count, self.available_read());

        f(&self.store.borrow()[self.rpos..self.rpos + count]).map(|count| {
            self.rpos += count;
            count
        })
    }

    // Discards up to count bytes that were already handed out by read and returns how many were
    // discarded
    pub fn skip(&mut self, count: usize) -> usize {
        let count = cmp::min(count, self.available_read());
        self.rpos += count;
        count
    }

    fn discard_already_read_data(&mut self) {
        let available = self.available_read();
        let data = self.store.borrow_mut();
        if self.rpos != data.len() {
            unsafe {
                ptr::copy(
                    &data[self.rpos] as *const u8,
                    &mut data[0] as *mut u8,
                    available,
                );
            }
        }

        self.wpos -= self.rpos;
        self.rpos = 0;
    }
}

/// Received bytes are queued for the application to read later. Bytes that don't fit are
/// dropped.
impl<S: BorrowMut<[u8]>> ByteSink for Buffer<S> {
    fn deliver(&mut self, data: &[u8]) {
        let written = self.write(data);
        if written < data.len() {
            warn!("rx: dropped {} bytes, buffer full", data.len() - written);
        }
    }
}

/// Default backing store for the mediocre buffer
pub struct DefaultBufferStore([u8; 128]);

impl Default for DefaultBufferStore {
    fn default() -> Self {
        DefaultBufferStore([0; 128])
    }
}

impl Borrow<[u8]> for DefaultBufferStore {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl BorrowMut<[u8]> for DefaultBufferStore {
    fn borrow_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Default transmit store, large enough for eight full speed bulk packets
pub struct DefaultTransmitStore([u8; 512]);

impl Default for DefaultTransmitStore {
    fn default() -> Self {
        DefaultTransmitStore([0; 512])
    }
}

impl Borrow<[u8]> for DefaultTransmitStore {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl BorrowMut<[u8]> for DefaultTransmitStore {
    fn borrow_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
