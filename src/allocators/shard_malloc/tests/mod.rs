use super::*;

use core::mem::size_of;

use crate::large::LARGE_HEADER_SIZE;
use crate::mappers::limited_mapper::LimitedMapper;
use crate::page::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::size_class::{class_of, CLASS_COUNT, CLASS_SIZES, MAX_CLASS_SIZE};
use crate::util::page_offset;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};


type SingleShard<'a> = ShardMalloc<&'a LimitedMapper, 1>;

fn total_pages<M: Mapper, const SHARDS: usize>(allocator: &ShardMalloc<M, SHARDS>) -> usize {
    SizeClass::all()
        .flat_map(|class| (0..SHARDS).map(move |shard| (class, shard)))
        .map(|(class, shard)| allocator.bin_stats(class, shard).pages)
        .sum()
}

#[test]
fn test_1() {
    format::init();

    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper> = ShardMalloc::with_mapper(&mapper);

    let mut objects = vec![];
    for &size in CLASS_SIZES.iter().chain(&[MAX_CLASS_SIZE + 1, 3 * PAGE_SIZE]) {
        let p = allocator.malloc(size);
        unsafe {
            p.as_ptr().write_bytes(size as u8, size);
            assert!(allocator.usable_size(p) >= size);
        }
        objects.push((p, size));
    }

    for &(p, size) in &objects {
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
        assert!(bytes.iter().all(|&b| b == size as u8), "size {size}");
        unsafe { allocator.free(p) };
    }

    assert_eq!(mapper.live(), 0);
    assert_eq!(total_pages(&allocator), 0);
    assert_eq!(allocator.stats().live_chunks(), 0);
}

#[test]
fn test_class_boundary() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);

    let small = allocator.malloc(MAX_CLASS_SIZE);
    assert!(page_offset(small.as_ptr()) >= PAGE_HEADER_SIZE);
    assert_eq!(allocator.stats().pages_mapped, 1);
    assert_eq!(allocator.stats().large_mapped, 0);
    assert_eq!(allocator.bin_stats(SizeClass::LARGEST, 0).occupied, 1);

    let large = allocator.malloc(MAX_CLASS_SIZE + 1);
    assert_eq!(page_offset(large.as_ptr()), LARGE_HEADER_SIZE);
    assert_eq!(allocator.stats().pages_mapped, 1);
    assert_eq!(allocator.stats().large_mapped, 1);
    assert_eq!(unsafe { allocator.usable_size(large) }, MAX_CLASS_SIZE + 1);

    unsafe {
        allocator.free(small);
        allocator.free(large);
    }
    assert_eq!(mapper.live(), 0);
    assert_eq!(allocator.stats().live_large(), 0);
}

#[test]
fn test_round_trip_chain_length() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);

    for class in SizeClass::all() {
        // Keep one block live so the chain has a page to come back to.
        let anchor = allocator.malloc(class.size());
        for size in [class.size(), class.size() - 1] {
            let before = allocator.bin_stats(class, 0).pages;
            let p = allocator.malloc(size);
            unsafe { allocator.free(p) };
            let after = allocator.bin_stats(class, 0).pages;
            assert!(after == before || after + 1 == before, "class {class:?}");
        }
        unsafe { allocator.free(anchor) };
        assert_eq!(allocator.bin_stats(class, 0), BinStats::default());
    }
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_reclamation() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);
    let class = class_of(1984).unwrap();
    assert_eq!(class.blocks_per_page(), 2);

    let a = allocator.malloc(1984);
    let b = allocator.malloc(1984);
    assert_eq!(
        unsafe { Page::containing(a) },
        unsafe { Page::containing(b) },
        "Both blocks should share the first page."
    );
    let c = allocator.malloc(1984);
    assert_eq!(allocator.bin_stats(class, 0).pages, 2);
    assert_eq!(mapper.live(), 2);

    unsafe { allocator.free(a) };
    assert_eq!(allocator.bin_stats(class, 0).pages, 2);
    unsafe { allocator.free(b) };
    assert_eq!(allocator.bin_stats(class, 0).pages, 1);
    assert_eq!(mapper.live(), 1);
    assert_eq!(allocator.stats().pages_unmapped, 1);

    // The surviving page is now the head, its free block is handed out again.
    let d = allocator.malloc(1500);
    assert_eq!(unsafe { Page::containing(d) }, unsafe { Page::containing(c) });
    assert_eq!(allocator.bin_stats(class, 0).pages, 1);

    unsafe {
        allocator.free(c);
        allocator.free(d);
    }
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_no_overlap() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper> = ShardMalloc::with_mapper(&mapper);
    let mut rng = SmallRng::seed_from_u64(7);

    let mut live: Vec<(usize, usize)> = (0..2000)
        .map(|_| {
            let size = match rng.gen_range(0..10) {
                0 => rng.gen_range(MAX_CLASS_SIZE..3 * PAGE_SIZE),
                _ => rng.gen_range(0..512),
            };
            (allocator.malloc(size).as_ptr() as usize, size)
        })
        .collect();

    live.sort_unstable();
    for w in live.windows(2) {
        assert!(w[0].0 + w[0].1 <= w[1].0, "{:x?} overlaps {:x?}", w[0], w[1]);
    }

    for (p, _) in live {
        unsafe { allocator.free(NonNull::new(p as *mut u8).unwrap()) };
    }
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_occupancy_matches_live_blocks() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper, 3> = ShardMalloc::with_mapper(&mapper);
    let mut rng = SmallRng::seed_from_u64(42);
    let mut live: Vec<Vec<NonNull<u8>>> = vec![vec![]; CLASS_COUNT];

    for _ in 0..5000 {
        let class = SizeClass::from_index(rng.gen_range(0..CLASS_COUNT)).unwrap();
        let blocks = &mut live[class.index()];
        if !blocks.is_empty() && rng.gen_bool(0.4) {
            let p = blocks.swap_remove(rng.gen_range(0..blocks.len()));
            unsafe { allocator.free(p) };
        } else {
            blocks.push(allocator.malloc(class.size()));
        }
    }

    for class in SizeClass::all() {
        let occupied: usize = (0..3).map(|s| allocator.bin_stats(class, s).occupied).sum();
        assert_eq!(occupied, live[class.index()].len(), "class {class:?}");
        for shard in 0..3 {
            let stats = allocator.bin_stats(class, shard);
            assert_eq!(stats.capacity, stats.pages * class.blocks_per_page());
        }
    }

    for p in live.into_iter().flatten() {
        unsafe { allocator.free(p) };
    }
    assert_eq!(total_pages(&allocator), 0);
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_free_uses_the_page_shard() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper, 8> = ShardMalloc::with_mapper(&mapper);
    let blocks: Vec<_> = (0..400).map(|_| allocator.malloc(48)).collect();

    let class = class_of(48).unwrap();
    let mut per_shard = [0_usize; 8];
    for &p in &blocks {
        let shard = unsafe { Page::containing(p) }.shard();
        assert!(shard < 8);
        per_shard[shard] += 1;
    }
    for (shard, &count) in per_shard.iter().enumerate() {
        assert_eq!(allocator.bin_stats(class, shard).occupied, count);
    }
    assert!(per_shard.iter().filter(|&&c| c > 0).count() > 1);

    for p in blocks {
        unsafe { allocator.free(p) };
    }
    assert_eq!(total_pages(&allocator), 0);
}

#[test]
fn test_resize_preserves_records() {
    let allocator = ShardMalloc::new();
    unsafe {
        let p = allocator.malloc(30 * size_of::<u64>()).cast::<u64>();
        for i in 0..30 {
            p.as_ptr().add(i).write(i as u64 * 1_000_003);
        }
        let q = allocator
            .resize(Some(p.cast()), 50 * size_of::<u64>())
            .cast::<u64>();
        for i in 0..30 {
            assert_eq!(q.as_ptr().add(i).read(), i as u64 * 1_000_003);
        }
        allocator.free(q.cast());
    }
    assert_eq!(allocator.stats().live_chunks(), 0);
}

#[test]
fn test_resize_across_paths() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper> = ShardMalloc::with_mapper(&mapper);
    unsafe {
        let p = allocator.malloc(100);
        for i in 0..100 {
            p.as_ptr().add(i).write(i as u8);
        }
        // Small to large.
        let q = allocator.resize(Some(p), 5 * PAGE_SIZE);
        assert_eq!(page_offset(q.as_ptr()), LARGE_HEADER_SIZE);
        assert!((0..100).all(|i| *q.as_ptr().add(i) == i as u8));
        q.as_ptr().add(100).write_bytes(0xEE, 5 * PAGE_SIZE - 100);

        // Large to small, truncated to the new size.
        let r = allocator.resize(Some(q), 64);
        assert!(page_offset(r.as_ptr()) >= PAGE_HEADER_SIZE);
        assert!((0..64).all(|i| *r.as_ptr().add(i) == i as u8));

        // Same class still moves.
        let s = allocator.resize(Some(r), 60);
        assert_ne!(s, r);
        assert!((0..60).all(|i| *s.as_ptr().add(i) == i as u8));
        allocator.free(s);
    }
    assert_eq!(mapper.live(), 0);
    let stats = allocator.stats();
    assert_eq!(stats.chunks_allocated, 4);
    assert_eq!(stats.chunks_freed, 4);
}

#[test]
fn test_resize_none_allocates() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);
    unsafe {
        let p = allocator.resize(None, 200);
        assert_eq!(allocator.usable_size(p), 256);
        assert_eq!(allocator.stats().chunks_allocated, 1);
        allocator.free(p);
    }
}

#[test]
fn test_zero_size() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);
    let p1 = allocator.malloc(0);
    let p2 = allocator.malloc(0);
    assert_ne!(p1, p2);
    assert_eq!(unsafe { allocator.usable_size(p1) }, CLASS_SIZES[0]);
    assert_eq!(allocator.bin_stats(SizeClass::SMALLEST, 0).occupied, 2);
    unsafe {
        allocator.free(p1);
        allocator.free(p2);
    }
    assert_eq!(allocator.bin_stats(SizeClass::SMALLEST, 0).pages, 0);
}

#[test]
fn test_allocator_out_of_memory() {
    let mapper = LimitedMapper::new(1);
    let allocator = SingleShard::with_mapper(&mapper);
    let page_layout = Layout::from_size_align(MAX_CLASS_SIZE, 8).unwrap();

    let p = allocator.allocate(page_layout).unwrap();
    assert_eq!(p.len(), MAX_CLASS_SIZE);
    assert!(allocator.allocate(page_layout).is_err());
    assert!(allocator
        .allocate(Layout::from_size_align(2 * PAGE_SIZE, 8).unwrap())
        .is_err());
    unsafe {
        assert!(GlobalAlloc::alloc(&allocator, page_layout).is_null());
        // A failed resize leaves the original allocation alone.
        let q = p.as_ptr() as *mut u8;
        q.write(0x77);
        assert!(GlobalAlloc::realloc(&allocator, q, page_layout, 2 * PAGE_SIZE).is_null());
        assert_eq!(q.read(), 0x77);
        allocator.deallocate(NonNull::new(q).unwrap(), page_layout);
    }
    assert_eq!(mapper.live(), 0);

    mapper.refill(1);
    let p = allocator.allocate(page_layout).unwrap();
    unsafe { allocator.deallocate(p.cast(), page_layout) };
}

/// Set in the child process spawned by [`run_until_abort`], names the request to fail.
const ABORT_MODE: &str = "SHARD_MALLOC_ABORT_MODE";

/// Re-runs this test alone in a child process with `mode` in [`ABORT_MODE`]
/// and returns the child's stderr once it has exited unsuccessfully.
fn run_until_abort(test: &str, mode: &str) -> String {
    let (_, path) = module_path!().split_once("::").unwrap();
    let output = std::process::Command::new(std::env::current_exe().unwrap())
        .arg(format!("{path}::{test}"))
        .args(["--exact", "--nocapture", "--test-threads=1"])
        .env(ABORT_MODE, mode)
        .output()
        .unwrap();
    assert!(!output.status.success(), "{mode}: child exited with {}", output.status);
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_malloc_aborts_out_of_memory() {
    match std::env::var(ABORT_MODE).as_deref() {
        Ok("malloc") => {
            let mapper = LimitedMapper::new(0);
            let allocator = SingleShard::with_mapper(&mapper);
            allocator.malloc(64);
            unreachable!("malloc returned without memory");
        }
        Ok("resize") => {
            let mapper = LimitedMapper::new(1);
            let allocator = SingleShard::with_mapper(&mapper);
            let p = allocator.malloc(64);
            unsafe { allocator.resize(Some(p), 2 * PAGE_SIZE) };
            unreachable!("resize returned without memory");
        }
        Ok("huge") => {
            let allocator: ShardMalloc = ShardMalloc::new();
            allocator.malloc(usize::MAX);
            unreachable!("malloc returned for usize::MAX bytes");
        }
        _ => {}
    }

    let test = "test_malloc_aborts_out_of_memory";
    let stderr = run_until_abort(test, "malloc");
    assert!(stderr.contains("memory allocation of 64 bytes failed"), "{stderr}");

    let stderr = run_until_abort(test, "resize");
    let expected = format!("memory allocation of {} bytes failed", 2 * PAGE_SIZE);
    assert!(stderr.contains(&expected), "{stderr}");

    let stderr = run_until_abort(test, "huge");
    let expected = format!("memory allocation of {} bytes failed", isize::MAX);
    assert!(stderr.contains(&expected), "{stderr}");
}

#[test]
fn test_global_alloc_alignment() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper> = ShardMalloc::with_mapper(&mapper);
    unsafe {
        for align in [1, 2, 4, 8, 16, 32, 64, 128, 256, PAGE_SIZE] {
            for size in [1, 8, 24, 100, 1000, MAX_CLASS_SIZE, 2 * PAGE_SIZE] {
                let layout = Layout::from_size_align(size, align).unwrap();
                let p = GlobalAlloc::alloc(&allocator, layout);
                assert!(!p.is_null());
                assert_eq!(p as usize % align, 0, "size {size}, align {align}");
                p.write_bytes(0xC3, size);
                let q = GlobalAlloc::realloc(&allocator, p, layout, size * 2);
                assert_eq!(q as usize % align, 0, "size {size}, align {align}");
                assert!((0..size).all(|i| *q.add(i) == 0xC3));
                GlobalAlloc::dealloc(&allocator, q, Layout::from_size_align(size * 2, align).unwrap());
            }
        }
        let too_strict = Layout::from_size_align(64, 2 * PAGE_SIZE).unwrap();
        assert!(GlobalAlloc::alloc(&allocator, too_strict).is_null());
    }
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_allocator_api() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper> = ShardMalloc::with_mapper(&mapper);
    {
        let mut v: Vec<u64, _> = Vec::with_capacity_in(1, &allocator);
        for i in 0..10_000 {
            v.push(i);
        }
        assert!(v.iter().enumerate().all(|(i, &x)| i as u64 == x));
        v.truncate(10);
        v.shrink_to_fit();
        assert_eq!(v, (0..10).collect::<Vec<_>>());

        let b = Box::new_in([7_u8; 5000], &allocator);
        assert!(b.iter().all(|&x| x == 7));
    }
    assert_eq!(allocator.stats().live_chunks(), 0);
    assert_eq!(mapper.live(), 0);
}

#[test]
fn test_allocate_slice_covers_block() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);
    let layout = Layout::from_size_align(20, 4).unwrap();
    let p = allocator.allocate(layout).unwrap();
    assert_eq!(p.len(), 32);
    let p2 = unsafe {
        Allocator::grow(
            &allocator,
            p.cast(),
            layout,
            Layout::from_size_align(60, 4).unwrap(),
        )
        .unwrap()
    };
    assert_eq!(p2.len(), 64);
    unsafe { allocator.deallocate(p2.cast(), Layout::from_size_align(60, 4).unwrap()) };
}

#[test]
fn test_stats_display() {
    let mapper = LimitedMapper::unlimited();
    let allocator = SingleShard::with_mapper(&mapper);
    let p = allocator.malloc(10);
    let text = allocator.stats().to_string();
    assert!(text.contains("Mapped:   1"));
    assert!(text.contains("Allocs:   1"));
    unsafe { allocator.free(p) };
    assert!(format!("{allocator:?}").contains("shards: 1"));
}

#[test]
fn test_threads_share_one_allocator() {
    let mapper = LimitedMapper::unlimited();
    let allocator: ShardMalloc<&LimitedMapper> = ShardMalloc::with_mapper(&mapper);

    std::thread::scope(|s| {
        for t in 0..8_u8 {
            let allocator = &allocator;
            s.spawn(move || {
                let mut rng = SmallRng::seed_from_u64(t as u64);
                let mut live = vec![];
                for _ in 0..2000 {
                    if !live.is_empty() && rng.gen_bool(0.5) {
                        let (p, size): (NonNull<u8>, usize) =
                            live.swap_remove(rng.gen_range(0..live.len()));
                        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
                        assert!(bytes.iter().all(|&b| b == t));
                        unsafe { allocator.free(p) };
                    } else {
                        let size = rng.gen_range(1..600);
                        let p = allocator.malloc(size);
                        unsafe { p.as_ptr().write_bytes(t, size) };
                        live.push((p, size));
                    }
                }
                for (p, _) in live {
                    unsafe { allocator.free(p) };
                }
            });
        }
    });

    assert_eq!(total_pages(&allocator), 0);
    assert_eq!(mapper.live(), 0);
    assert_eq!(allocator.stats().live_chunks(), 0);
}
