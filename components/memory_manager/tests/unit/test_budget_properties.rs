//! Property tests: the live total never exceeds the budget

use memory_manager::BoundedAllocator;
use proptest::prelude::*;
use std::ptr;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Resize(usize, usize),
    Free(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..600).prop_map(Op::Alloc),
        (any::<usize>(), 1usize..600).prop_map(|(i, n)| Op::Resize(i, n)),
        any::<usize>().prop_map(Op::Free),
    ]
}

proptest! {
    #[test]
    fn prop_budget_never_exceeded(limit in 0usize..2048, ops in prop::collection::vec(op_strategy(), 0..64)) {
        let allocator = BoundedAllocator::new(limit);
        let mut live: Vec<(*mut u8, usize)> = Vec::new();

        for op in ops {
            let before = allocator.remaining();
            match op {
                Op::Alloc(size) => {
                    let p = unsafe { allocator.reallocate(ptr::null_mut(), 0, size) };
                    if p.is_null() {
                        prop_assert_eq!(allocator.remaining(), before);
                        prop_assert!(size > before);
                    } else {
                        live.push((p, size));
                    }
                }
                Op::Resize(i, size) if !live.is_empty() => {
                    let slot = i % live.len();
                    let (p, old) = live[slot];
                    let q = unsafe { allocator.reallocate(p, old, size) };
                    if q.is_null() {
                        prop_assert_eq!(allocator.remaining(), before);
                    } else {
                        live[slot] = (q, size);
                    }
                }
                Op::Free(i) if !live.is_empty() => {
                    let (p, old) = live.swap_remove(i % live.len());
                    unsafe { allocator.reallocate(p, old, 0) };
                }
                _ => {}
            }

            let total: usize = live.iter().map(|(_, size)| size).sum();
            prop_assert!(total <= limit);
            prop_assert_eq!(allocator.in_use(), total);
        }

        for (p, size) in live {
            unsafe { allocator.reallocate(p, size, 0) };
        }
        prop_assert_eq!(allocator.remaining(), limit);
    }
}
