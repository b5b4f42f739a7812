use crate::config::DeltaConfig;
use crate::delta::codec;
use crate::delta::rolling::{strong_checksum, BlockIndex, RollingSum};
use crate::delta::{Delta, DeltaOp};

/// construct a delta transforming `base` into `target` using a
/// rolling-hash block index over `base`
///
/// matches are confirmed with a strong checksum, then extended
/// forward and backward (backward bounded by the last emitted byte,
/// so produced ranges never overlap).
pub fn build_delta(base: &[u8], target: &[u8], block_size: usize) -> Delta {
    let mut ops: Vec<DeltaOp> = Vec::new();
    let mut last_emit = 0usize;

    if base.len() >= block_size && target.len() >= block_size {
        let index = BlockIndex::build(base, block_size);
        let mut pos = 0usize;
        let mut rolling = RollingSum::new(&target[0..block_size]);

        while pos + block_size <= target.len() {
            let best = find_match(base, target, &index, &rolling, pos, last_emit, block_size);

            if let Some((base_start, target_start, len)) = best {
                if target_start > last_emit {
                    push_insert(&mut ops, &target[last_emit..target_start]);
                }
                push_copy(&mut ops, base_start as u64, len as u64);
                last_emit = target_start + len;
                pos = last_emit;
                if pos + block_size <= target.len() {
                    rolling = RollingSum::new(&target[pos..pos + block_size]);
                }
            } else {
                if pos + block_size < target.len() {
                    rolling.roll(target[pos], target[pos + block_size]);
                }
                pos += 1;
            }
        }
    }

    if last_emit < target.len() {
        push_insert(&mut ops, &target[last_emit..]);
    }

    Delta::new(base.len() as u64, target.len() as u64, ops)
}

/// longest confirmed match covering the window at `pos`
fn find_match(
    base: &[u8],
    target: &[u8],
    index: &BlockIndex,
    rolling: &RollingSum,
    pos: usize,
    last_emit: usize,
    block_size: usize,
) -> Option<(usize, usize, usize)> {
    let candidates = index.candidates(rolling.digest());
    if candidates.is_empty() {
        return None;
    }

    let window_strong = strong_checksum(&target[pos..pos + block_size]);
    let mut best: Option<(usize, usize, usize)> = None;

    for &(cand, ref strong) in candidates {
        if *strong != window_strong {
            continue;
        }

        // extend forward
        let mut len = block_size;
        while cand + len < base.len()
            && pos + len < target.len()
            && base[cand + len] == target[pos + len]
        {
            len += 1;
        }

        // extend backward, never past the last emitted byte
        let mut base_start = cand;
        let mut target_start = pos;
        while base_start > 0
            && target_start > last_emit
            && base[base_start - 1] == target[target_start - 1]
        {
            base_start -= 1;
            target_start -= 1;
            len += 1;
        }

        if best.map_or(true, |(_, _, best_len)| len > best_len) {
            best = Some((base_start, target_start, len));
        }
    }

    best
}

/// append literal bytes, coalescing with a trailing insert
fn push_insert(ops: &mut Vec<DeltaOp>, data: &[u8]) {
    if let Some(DeltaOp::Insert(prev)) = ops.last_mut() {
        prev.extend_from_slice(data);
        return;
    }
    ops.push(DeltaOp::Insert(data.to_vec()));
}

/// append a copy range, coalescing with a contiguous trailing copy
fn push_copy(ops: &mut Vec<DeltaOp>, offset: u64, len: u64) {
    if let Some(DeltaOp::Copy {
        offset: prev_offset,
        len: prev_len,
    }) = ops.last_mut()
    {
        if *prev_offset + *prev_len == offset {
            *prev_len += len;
            return;
        }
    }
    ops.push(DeltaOp::Copy { offset, len });
}

/// threshold policy: a delta is worth storing only when the target is
/// large enough and the encoding saves enough relative to the target
pub fn acceptable(delta: &Delta, target_len: usize, config: &DeltaConfig) -> bool {
    if target_len < config.min_size {
        return false;
    }
    let encoded = codec::encoded_len(delta) as f64;
    encoded / (target_len as f64) < config.max_ratio
}
