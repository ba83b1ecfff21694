use strata_gfx::TextureHandle;

/// Fixed-capacity table of texture slots indexed by shaders.
///
/// Slot 0 is the fallback texture and is never handed out. Every change to
/// the table bumps `generation` so descriptor owners know to rebind.
#[derive(Debug)]
pub struct BindlessTable {
    slots: Vec<Option<TextureHandle>>,
    free: Vec<u32>,
    generation: u64,
}

impl BindlessTable {
    pub fn new(capacity: u32, fallback: TextureHandle) -> Self {
        assert!(capacity >= 2, "bindless table needs room beyond the fallback slot");
        let mut slots = vec![None; capacity as usize];
        slots[0] = Some(fallback);
        Self {
            slots,
            // Popped from the back, so low slots are handed out first.
            free: (1..capacity).rev().collect(),
            generation: 1,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fallback(&self) -> TextureHandle {
        self.slots[0].unwrap_or_default()
    }

    pub fn allocate(&mut self, texture: TextureHandle) -> Option<u32> {
        let index = self.free.pop()?;
        self.slots[index as usize] = Some(texture);
        self.generation += 1;
        Some(index)
    }

    pub fn release(&mut self, index: u32) {
        if index == 0 {
            return;
        }
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if slot.take().is_some() {
                self.free.push(index);
                self.generation += 1;
            }
        }
    }

    pub fn get(&self, index: u32) -> Option<TextureHandle> {
        self.slots.get(index as usize).copied().flatten()
    }

    /// Handles for every slot, with empty slots pointing at the fallback.
    pub fn handles(&self) -> Vec<TextureHandle> {
        let fallback = self.fallback();
        self.slots.iter().map(|s| s.unwrap_or(fallback)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_skips_fallback_slot() {
        let mut table = BindlessTable::new(4, TextureHandle(9));
        assert_eq!(table.allocate(TextureHandle(1)), Some(1));
        assert_eq!(table.allocate(TextureHandle(2)), Some(2));
        assert_eq!(table.get(0), Some(TextureHandle(9)));
    }

    #[test]
    fn released_slots_are_reused_and_bump_generation() {
        let mut table = BindlessTable::new(3, TextureHandle(9));
        let g0 = table.generation();
        let a = table.allocate(TextureHandle(1)).unwrap();
        table.allocate(TextureHandle(2)).unwrap();
        assert_eq!(table.allocate(TextureHandle(3)), None);
        table.release(a);
        assert!(table.generation() > g0);
        assert_eq!(table.allocate(TextureHandle(4)), Some(a));
    }

    #[test]
    fn empty_slots_resolve_to_fallback() {
        let mut table = BindlessTable::new(3, TextureHandle(9));
        table.allocate(TextureHandle(1));
        assert_eq!(
            table.handles(),
            vec![TextureHandle(9), TextureHandle(1), TextureHandle(9)]
        );
    }
}
