mod common;

use common::{boot, boot_sized, boot_with_program, program, ElfBuilder, DATA, DATA_FLAGS, ENTRY, TEXT_FLAGS};
use vesper_core::config::{space, MAX_PROCESSES};
use vesper_core::fs::mem::MemFs;
use vesper_core::loader::ImageKind;
use vesper_core::mem::PageFlags;
use vesper_core::process::{ProcessId, ProcessState};
use vesper_core::{Kernel, KernelError};

fn flags_at(kernel: &Kernel, id: ProcessId, virt: u32) -> PageFlags {
    let task = kernel.process(id).unwrap().task();
    let space = kernel.tasks().get(task).unwrap().space();
    space.entry(kernel.heap(), virt).unwrap().flags()
}

fn translate(kernel: &Kernel, id: ProcessId, virt: u32) -> u32 {
    let task = kernel.process(id).unwrap().task();
    let space = kernel.tasks().get(task).unwrap().space();
    space.translate(kernel.heap(), virt).unwrap()
}

#[test]
fn load_into_slot_links_process_and_task() {
    let (mut kernel, _) = boot_with_program();
    let slot = ProcessId(3);

    assert_eq!(kernel.load_into_slot("0:/prog.elf", slot), Ok(slot));
    assert_eq!(kernel.processes().len(), 1);

    let process = kernel.process(slot).unwrap();
    assert_eq!(process.filename(), "0:/prog.elf");
    let task = kernel.tasks().get(process.task()).unwrap();
    assert_eq!(task.process(), slot);
    assert_eq!(task.registers().ip, ENTRY);
    assert_eq!(task.registers().esp, space::STACK_VIRTUAL_ADDRESS_START);
    assert_eq!(task.registers().cs, 0x1B);
    assert_eq!(task.registers().ss, 0x23);

    // first task ever created becomes current
    assert_eq!(kernel.current_process(), Some(slot));
}

#[test]
fn occupied_and_out_of_range_slots_are_rejected() {
    let (mut kernel, _) = boot_with_program();
    kernel.load_into_slot("0:/prog.elf", ProcessId(0)).unwrap();

    assert_eq!(kernel.load_into_slot("0:/prog.elf", ProcessId(0)), Err(KernelError::SlotTaken));
    assert_eq!(
        kernel.load_into_slot("0:/prog.elf", ProcessId(MAX_PROCESSES)),
        Err(KernelError::InvalidArgument)
    );
}

#[test]
fn full_table_reports_slot_taken() {
    let (mut kernel, _) = boot_with_program();
    for expected in 0..MAX_PROCESSES {
        assert_eq!(kernel.load("0:/prog.elf"), Ok(ProcessId(expected)));
    }
    assert_eq!(kernel.load("0:/prog.elf"), Err(KernelError::SlotTaken));
}

#[test]
fn missing_file_leaves_no_trace() {
    let (mut kernel, _) = boot_with_program();
    let before = kernel.heap().free_blocks();

    assert_eq!(kernel.load("0:/missing.elf"), Err(KernelError::Io));
    assert_eq!(kernel.heap().free_blocks(), before);
    assert!(kernel.processes().is_empty());
    assert!(kernel.tasks().is_empty());
}

#[test]
fn segments_are_mapped_with_their_own_flags() {
    let (mut kernel, _) = boot_with_program();
    let id = kernel.load("0:/prog.elf").unwrap();

    let image = kernel.process(id).unwrap().image();
    assert_eq!(image.kind(), ImageKind::Elf);
    let elf = image.as_elf().unwrap();
    assert_eq!(elf.segments().len(), 2);
    assert_eq!(elf.virtual_base(), ENTRY);
    assert_eq!(elf.virtual_end(), DATA + 4);

    let text = flags_at(&kernel, id, ENTRY);
    assert!(text.contains(PageFlags::PRESENT | PageFlags::USER));
    assert!(!text.contains(PageFlags::WRITABLE));

    let data = flags_at(&kernel, id, DATA);
    assert!(data.contains(PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE));
    assert_ne!(translate(&kernel, id, ENTRY), translate(&kernel, id, DATA));
    assert_eq!(translate(&kernel, id, ENTRY), elf.buffer() + 0x1000);

    let mut bytes = [0u8; 4];
    kernel.copy_from_user(id, DATA, &mut bytes).unwrap();
    assert_eq!(&bytes, b"data");

    // memory size beyond the file is backed and zeroed
    let mut bss = [0xFFu8; 8];
    kernel.copy_from_user(id, DATA + 0x1000, &mut bss).unwrap();
    assert_eq!(bss, [0u8; 8]);
    assert_eq!(kernel.copy_to_user(id, ENTRY, b"x"), Err(KernelError::InvalidArgument));
}

#[test]
fn corrupt_signature_falls_back_to_flat_binary() {
    let mut bytes = program();
    bytes[1] = b'X';
    let (mut kernel, _) = boot(MemFs::new().with_file("0:/blank.bin", bytes.clone()));

    let id = kernel.load("0:/blank.bin").unwrap();
    let image = kernel.process(id).unwrap().image();
    assert_eq!(image.kind(), ImageKind::FlatBinary);
    assert_eq!(image.entry(), space::PROGRAM_VIRTUAL_ADDRESS);
    assert_eq!(image.size() as usize, bytes.len());
    assert_eq!(translate(&kernel, id, space::PROGRAM_VIRTUAL_ADDRESS), image.buffer());

    let mut head = [0u8; 4];
    kernel.copy_from_user(id, space::PROGRAM_VIRTUAL_ADDRESS, &mut head).unwrap();
    assert_eq!(head, [0x7F, b'X', b'L', b'F']);
}

#[test]
fn segment_ending_past_4gib_falls_back_to_flat_binary() {
    let huge = ElfBuilder::new(ENTRY)
        .segment(ENTRY, vec![0x90; 16], 0xFFFF_F800, TEXT_FLAGS)
        .build();
    let wrapped = ElfBuilder::new(ENTRY)
        .segment(0xFFFF_F000, vec![0; 0x1000], 0x1000, DATA_FLAGS)
        .build();
    let fs = MemFs::new()
        .with_file("0:/huge.elf", huge.clone())
        .with_file("0:/wrapped.elf", wrapped.clone());
    let (mut kernel, _) = boot(fs);

    for (name, bytes) in [("0:/huge.elf", huge), ("0:/wrapped.elf", wrapped)] {
        let id = kernel.load(name).unwrap();
        let image = kernel.process(id).unwrap().image();
        assert_eq!(image.kind(), ImageKind::FlatBinary);
        assert_eq!(image.size() as usize, bytes.len());
    }
}

#[test]
fn stack_is_mapped_below_the_start_address() {
    let (mut kernel, _) = boot_with_program();
    let id = kernel.load("0:/prog.elf").unwrap();
    let stack = kernel.process(id).unwrap().stack();

    assert_eq!(translate(&kernel, id, space::stack_virtual_address_end()), stack);
    let top = space::STACK_VIRTUAL_ADDRESS_START - 4;
    kernel.copy_to_user(id, top, &7u32.to_le_bytes()).unwrap();
    let mut word = [0u8; 4];
    kernel.heap().ram().read(stack + space::USER_STACK_SIZE - 4, &mut word).unwrap();
    assert_eq!(u32::from_le_bytes(word), 7);
}

#[test]
fn terminate_frees_slot_and_memory() {
    let (mut kernel, _) = boot_with_program();
    let first = kernel.load("0:/prog.elf").unwrap();
    let before = kernel.heap().free_blocks();

    let second = kernel.load("0:/prog.elf").unwrap();
    kernel.process_malloc(second, 9000).unwrap();
    kernel.inject_arguments(second, &["prog", "-v"]).unwrap();
    kernel.terminate(second).unwrap();

    assert!(kernel.process(second).is_none());
    assert_eq!(kernel.terminate(second), Err(KernelError::NotFound));
    assert_eq!(kernel.heap().free_blocks(), before);
    assert_eq!(kernel.current_process(), Some(first));
}

#[test]
fn terminating_current_promotes_another_process() {
    let (mut kernel, _) = boot_with_program();
    let first = kernel.load("0:/prog.elf").unwrap();
    let second = kernel.load("0:/prog.elf").unwrap();
    assert_eq!(kernel.current_process(), Some(first));

    kernel.terminate(first).unwrap();
    assert_eq!(kernel.current_process(), Some(second));

    let task = kernel.process(second).unwrap().task();
    let directory = kernel.tasks().get(task).unwrap().space().directory();
    assert_eq!(kernel.active_directory(), Some(directory));
}

#[test]
#[should_panic(expected = "no process left to switch to")]
fn terminating_last_process_halts() {
    let (mut kernel, _) = boot_with_program();
    let only = kernel.load("0:/prog.elf").unwrap();
    let _ = kernel.terminate(only);
}

#[test]
fn malloc_memory_survives_a_trap_and_double_free_is_ignored() {
    let (mut kernel, _) = boot_with_program();
    let id = kernel.load_switch("0:/prog.elf").unwrap();
    let before = kernel.heap().free_blocks();

    let ptr = kernel.process_malloc(id, 100).unwrap();
    assert!(flags_at(&kernel, id, ptr).contains(PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE));
    kernel.copy_to_user(id, ptr, b"hello").unwrap();

    let frame = common::syscall(&mut kernel, vesper_core::syscall::Command::GetPid, &[]);
    assert_eq!(frame.eax, id.0 as u32);

    let mut buf = [0u8; 5];
    kernel.copy_from_user(id, ptr, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    kernel.copy_to_user(id, ptr + 5, b"!").unwrap();

    kernel.process_free(id, ptr).unwrap();
    assert!(!flags_at(&kernel, id, ptr).contains(PageFlags::PRESENT));
    assert_eq!(kernel.process_free(id, ptr), Ok(()));
    assert_eq!(kernel.heap().free_blocks(), before);
}

#[test]
fn fork_copies_memory_and_hands_off_to_child() {
    let (mut kernel, _) = boot_with_program();
    let parent = kernel.load_switch("0:/prog.elf").unwrap();
    let ptr = kernel.process_malloc(parent, 64).unwrap();
    kernel.copy_to_user(parent, ptr, b"shared").unwrap();
    let top = space::STACK_VIRTUAL_ADDRESS_START - 4;
    kernel.copy_to_user(parent, top, &0xCAFEu32.to_le_bytes()).unwrap();

    let child = kernel.fork(parent).unwrap();
    assert_ne!(child, parent);
    assert_eq!(kernel.current_process(), Some(child));
    assert_eq!(kernel.process(child).unwrap().parent(), Some(parent));

    let mut buf = [0u8; 6];
    kernel.copy_from_user(child, ptr, &mut buf).unwrap();
    assert_eq!(&buf, b"shared");
    assert_ne!(translate(&kernel, child, ptr), translate(&kernel, parent, ptr));

    kernel.copy_to_user(child, ptr, b"CHILD!").unwrap();
    kernel.copy_from_user(parent, ptr, &mut buf).unwrap();
    assert_eq!(&buf, b"shared");

    let mut word = [0u8; 4];
    kernel.copy_from_user(child, top, &mut word).unwrap();
    assert_eq!(u32::from_le_bytes(word), 0xCAFE);

    let child_task = kernel.process(child).unwrap().task();
    let parent_task = kernel.process(parent).unwrap().task();
    assert_eq!(kernel.tasks().get(child_task).unwrap().registers().eax, 0);
    assert_eq!(kernel.tasks().get(parent_task).unwrap().registers().eax, child.0 as u32);
}

#[test]
fn child_malloc_skips_addresses_inherited_from_parent() {
    let (mut kernel, _) = boot_with_program();
    let parent = kernel.load_switch("0:/prog.elf").unwrap();
    let ptr = kernel.process_malloc(parent, 64).unwrap();
    kernel.copy_to_user(parent, ptr, b"forked").unwrap();

    let child = kernel.fork(parent).unwrap();
    kernel.process_free(parent, ptr).unwrap();
    let before = kernel.heap().free_blocks();

    let mut fresh = Vec::new();
    for _ in 0..8 {
        let next = kernel.process_malloc(child, 64).unwrap();
        assert_ne!(next, ptr);
        kernel.copy_to_user(child, next, b"fresh!").unwrap();
        fresh.push(next);
    }
    assert_eq!(kernel.heap().free_blocks(), before - fresh.len());

    let mut buf = [0u8; 6];
    kernel.copy_from_user(child, ptr, &mut buf).unwrap();
    assert_eq!(&buf, b"forked");
    let inherited = kernel.process(child).unwrap().allocation(ptr).unwrap().phys;
    assert!(!fresh.contains(&inherited));

    kernel.process_free(child, ptr).unwrap();
    for next in fresh {
        kernel.process_free(child, next).unwrap();
    }
    assert_eq!(kernel.process(child).unwrap().allocations().count(), 0);
}

// An address space is one directory plus 1024 tables.
const SPACE_BLOCKS: u32 = 1025;
// Loaded program: four image blocks, four stack blocks and a space.
const PROCESS_BLOCKS: u32 = 4 + 4 + SPACE_BLOCKS;

fn program_fs() -> MemFs {
    MemFs::new().with_file("0:/prog.elf", program())
}

#[test]
fn load_without_room_for_the_stack_leaves_no_trace() {
    // Room for the image read and its grown copy, not for the stack.
    let (mut kernel, _) = boot_sized(program_fs(), SPACE_BLOCKS + 7);
    let free = kernel.heap().free_blocks();

    assert_eq!(kernel.load("0:/prog.elf"), Err(KernelError::OutOfMemory));
    assert_eq!(kernel.heap().free_blocks(), free);
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.tasks().len(), 0);
}

#[test]
fn load_without_room_for_the_task_leaves_no_trace() {
    let (mut kernel, _) = boot_sized(program_fs(), SPACE_BLOCKS + 57);
    let free = kernel.heap().free_blocks();

    assert_eq!(kernel.load("0:/prog.elf"), Err(KernelError::OutOfMemory));
    assert_eq!(kernel.heap().free_blocks(), free);
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.tasks().len(), 0);
}

#[test]
fn fork_without_room_for_the_task_leaves_parent_alone() {
    let (mut kernel, _) = boot_sized(program_fs(), SPACE_BLOCKS + PROCESS_BLOCKS + 57);
    let parent = kernel.load_switch("0:/prog.elf").unwrap();
    let free = kernel.heap().free_blocks();

    assert_eq!(kernel.fork(parent), Err(KernelError::OutOfMemory));
    assert_eq!(kernel.heap().free_blocks(), free);
    assert_eq!(kernel.processes().len(), 1);
    assert_eq!(kernel.tasks().len(), 1);
    assert_eq!(kernel.current_process(), Some(parent));
}

#[test]
fn fork_failing_while_copying_allocations_leaves_parent_alone() {
    // The child's space maps fine; copying the 8-block allocation does not fit.
    let blocks = SPACE_BLOCKS + PROCESS_BLOCKS + 8 + PROCESS_BLOCKS + 7;
    let (mut kernel, _) = boot_sized(program_fs(), blocks);
    let parent = kernel.load_switch("0:/prog.elf").unwrap();
    let ptr = kernel.process_malloc(parent, 8 * 4096).unwrap();
    kernel.copy_to_user(parent, ptr, b"keep").unwrap();
    let free = kernel.heap().free_blocks();
    assert_eq!(free, PROCESS_BLOCKS as usize + 7);

    assert_eq!(kernel.fork(parent), Err(KernelError::OutOfMemory));
    assert_eq!(kernel.heap().free_blocks(), free);
    assert_eq!(kernel.processes().len(), 1);
    assert_eq!(kernel.tasks().len(), 1);
    assert_eq!(kernel.current_process(), Some(parent));

    let mut buf = [0u8; 4];
    kernel.copy_from_user(parent, ptr, &mut buf).unwrap();
    assert_eq!(&buf, b"keep");
}

#[test]
fn wait_suspends_until_target_exits() {
    let (mut kernel, _) = boot_with_program();
    let waiter = kernel.load("0:/prog.elf").unwrap();
    let target = kernel.load("0:/prog.elf").unwrap();

    kernel.wait(waiter, target).unwrap();
    assert_eq!(kernel.process(waiter).unwrap().state(), ProcessState::Waiting { target });
    assert_eq!(kernel.current_process(), Some(target));

    kernel.terminate(target).unwrap();
    assert_eq!(kernel.process(waiter).unwrap().state(), ProcessState::Runnable);
    assert_eq!(kernel.current_process(), Some(waiter));
}

#[test]
fn wait_on_missing_or_self() {
    let (mut kernel, _) = boot_with_program();
    let id = kernel.load("0:/prog.elf").unwrap();

    assert_eq!(kernel.wait(id, id), Err(KernelError::InvalidArgument));
    assert_eq!(kernel.wait(id, ProcessId(7)), Ok(()));
    assert!(kernel.process(id).unwrap().is_runnable());
}

#[test]
#[should_panic(expected = "no process left to switch to")]
fn mutual_wait_with_nothing_runnable_halts() {
    let (mut kernel, _) = boot_with_program();
    let a = kernel.load("0:/prog.elf").unwrap();
    let b = kernel.load("0:/prog.elf").unwrap();
    kernel.wait(a, b).unwrap();
    let _ = kernel.wait(b, a);
}

#[test]
fn arguments_are_copied_into_process_memory() {
    let (mut kernel, _) = boot_with_program();
    let id = kernel.load("0:/prog.elf").unwrap();
    kernel.inject_arguments(id, &["prog", "alpha", "beta"]).unwrap();

    let arguments = kernel.arguments(id).unwrap();
    assert_eq!(arguments.argc, 3);

    let mut words = Vec::new();
    for index in 0..3 {
        let mut word = [0u8; 4];
        kernel.copy_from_user(id, arguments.argv + index * 4, &mut word).unwrap();
        words.push(kernel.copy_string_from_user(id, u32::from_le_bytes(word), 64).unwrap());
    }
    assert_eq!(words, ["prog", "alpha", "beta"]);
}

#[test]
fn keyboard_input_goes_to_current_process() {
    let (mut kernel, _) = boot_with_program();
    let first = kernel.load("0:/prog.elf").unwrap();
    let second = kernel.load("0:/prog.elf").unwrap();

    kernel.keyboard_push(b'a');
    kernel.keyboard_push(0);
    kernel.keyboard_push(b'b');
    kernel.keyboard_backspace();
    kernel.switch_process(second).unwrap();
    assert_eq!(kernel.keyboard_pop(), 0);

    kernel.switch_process(first).unwrap();
    assert_eq!(kernel.keyboard_pop(), b'a');
    assert_eq!(kernel.keyboard_pop(), 0);
}
