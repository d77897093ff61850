use vesper_core::config::BLOCK_SIZE;
use vesper_core::mem::heap::{BlockTable, Heap};
use vesper_core::mem::{KernelHeap, Ram};
use vesper_core::{KernelConfig, KernelError};

const START: u32 = 0x0100_0000;

fn heap(blocks: usize) -> Heap {
    Heap::create(START, START + blocks as u32 * BLOCK_SIZE, BlockTable::new(blocks)).unwrap()
}

#[test]
fn ten_block_scenario_reuses_freed_run() {
    let mut heap = heap(10);

    let first = heap.allocate(5000).unwrap();
    assert_eq!(first, START);
    assert_eq!(heap.free_blocks(), 8);

    let second = heap.allocate(4096).unwrap();
    assert_eq!(second, START + 2 * BLOCK_SIZE);
    assert_eq!(heap.free_blocks(), 7);

    heap.free(first);
    assert_eq!(heap.free_blocks(), 9);

    let third = heap.allocate(8192).unwrap();
    assert_eq!(third, first);
    assert_eq!(heap.free_blocks(), 7);
}

#[test]
fn exhausted_heap_reports_out_of_memory() {
    let mut heap = heap(10);
    let all = heap.allocate(10 * BLOCK_SIZE as usize).unwrap();
    assert_eq!(heap.allocate(1), Err(KernelError::OutOfMemory));

    heap.free(all);
    assert_eq!(heap.allocate(11 * BLOCK_SIZE as usize), Err(KernelError::OutOfMemory));
    assert_eq!(heap.free_blocks(), 10);
}

#[test]
fn live_allocations_never_overlap() {
    let mut heap = heap(32);
    let sizes = [1usize, 4096, 4097, 9000, 100, 12288, 1, 20000];
    let mut live: Vec<(u32, u32)> = Vec::new();

    for (round, size) in sizes.iter().enumerate() {
        let addr = heap.allocate(*size).unwrap();
        let end = addr + ((*size as u32 + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE;
        assert!(addr >= heap.start() && end <= heap.end());
        for (other, other_end) in &live {
            assert!(end <= *other || addr >= *other_end, "overlap at 0x{:08X}", addr);
        }
        live.push((addr, end));

        if round % 3 == 2 {
            let (freed, _) = live.remove(0);
            heap.free(freed);
        }
    }
}

#[test]
fn create_rejects_bad_geometry() {
    assert_eq!(
        Heap::create(START + 1, START + 4 * BLOCK_SIZE, BlockTable::new(4)).err(),
        Some(KernelError::InvalidArgument)
    );
    assert_eq!(
        Heap::create(START, START + 4 * BLOCK_SIZE, BlockTable::new(3)).err(),
        Some(KernelError::InvalidArgument)
    );
}

#[test]
fn kzalloc_clears_reused_blocks() {
    let ram = Ram::zeroed(START, 4 * BLOCK_SIZE);
    let mut heap = KernelHeap::from_ram(ram).unwrap();

    let dirty = heap.kmalloc(16).unwrap();
    heap.ram_mut().write(dirty, &[0xAA; 16]).unwrap();
    heap.kfree(dirty);

    let clean = heap.kzalloc(16).unwrap();
    assert_eq!(clean, dirty);
    let mut buf = [0xFFu8; 16];
    heap.ram().read(clean, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 16]);
}

#[test]
fn config_validation() {
    assert!(KernelConfig::default().validate().is_ok());
    assert_eq!(
        KernelConfig::new().with_heap_size(0).validate(),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        KernelConfig::new().with_heap_base(0x1001).validate(),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        KernelConfig::new().with_heap_base(0xFFFF_F000).with_heap_size(0x2000).validate(),
        Err(KernelError::InvalidArgument)
    );

    // The heap must stay clear of the user stack and program window.
    assert_eq!(
        KernelConfig::new().with_heap_base(0x0040_0000).validate(),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        KernelConfig::new().with_heap_base(0).with_heap_size(0x0040_0000).validate(),
        Err(KernelError::InvalidArgument)
    );
    assert!(KernelConfig::new().with_heap_base(0x0010_0000).with_heap_size(0x0020_0000).validate().is_ok());
}
