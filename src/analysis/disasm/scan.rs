// Wed Jan 15 2026 - Alex

//! First-pass scans that look at raw words and bytes without decoding.

use crate::analysis::context::AnalysisContext;
use crate::analysis::disasm::LazyDisassembler;
use crate::analysis::error::AnalysisResult;
use serde::Serialize;

const PACIBSP: u32 = 0xd503237f;
const PACIASP: u32 = 0xd503233f;
const BTI_C: u32 = 0xd503245f;
const NOP: u32 = 0xd503201f;

/// `stp x29, x30, [sp, #-imm]!`
fn is_frame_record_push(word: u32) -> bool {
    word & 0xffc0_7fff == 0xa980_7bfd
}

/// `stp xA, xB, [sp, #-imm]!` for any register pair.
fn is_pre_index_push(word: u32) -> bool {
    word & 0xffe0_03e0 == 0xa9a0_03e0
}

/// `sub sp, sp, #imm`
fn is_stack_allocation(word: u32) -> bool {
    word & 0xff80_03ff == 0xd100_03ff
}

fn ends_previous_function(word: u32) -> bool {
    matches!(word, 0xd65f03c0 | 0xd65f0bff | 0xd65f0fff | NOP | 0)
        || word & 0xfc00_0000 == 0x1400_0000
        || word & 0xffe0_001f == 0xd420_0000
        || word & 0xfffffc1f == 0xd61f0000
}

fn is_printable(byte: u8) -> bool {
    (0x20..0x7f).contains(&byte) || byte == b'\t' || byte == b'\n' || byte == b'\r'
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickString {
    pub address: u64,
    pub text: String,
}

impl LazyDisassembler {
    /// Candidate function entries found by prologue shape alone, sorted.
    ///
    /// A `pacibsp`/`paciasp` always counts; a frame push or stack allocation
    /// counts only when it directly follows a return, tail branch, trap,
    /// padding, or the start of a code region.
    pub fn find_function_starts(&self) -> Vec<u64> {
        let mut starts = Vec::new();

        for region in self.reader().regions().into_iter().filter(|r| r.holds_code) {
            let bytes = match self.reader().read_bytes(region.start, region.size as usize) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::debug!("Skipping code region {}: {}", region.name, e);
                    continue;
                }
            };

            let mut previous: Option<u32> = None;
            for (i, chunk) in bytes.chunks_exact(4).enumerate() {
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let boundary = previous.map_or(true, ends_previous_function);
                let hit = match word {
                    PACIBSP | PACIASP => true,
                    BTI_C => boundary,
                    w if is_frame_record_push(w) || is_pre_index_push(w) || is_stack_allocation(w) => {
                        boundary && !matches!(previous, Some(PACIBSP | PACIASP | BTI_C))
                    }
                    _ => false,
                };
                if hit {
                    starts.push(region.start.as_u64() + (i as u64) * 4);
                }
                previous = Some(word);
            }
        }

        starts.sort_unstable();
        starts.dedup();
        log::debug!("Prologue scan found {} candidate function starts", starts.len());
        starts
    }

    /// NUL-terminated printable runs of at least `min_len` bytes in every
    /// non-code region. Progress is reported per region and cancellation
    /// is honoured between regions.
    pub fn extract_strings_quick(&self, min_len: usize, ctx: &AnalysisContext) -> AnalysisResult<Vec<QuickString>> {
        let min_len = min_len.max(1);
        let regions: Vec<_> = self.reader().regions().into_iter().filter(|r| !r.holds_code).collect();
        let total = regions.len();
        let mut found = Vec::new();

        for (done, region) in regions.iter().enumerate() {
            ctx.checkpoint()?;
            if let Ok(bytes) = self.reader().read_bytes(region.start, region.size as usize) {
                let mut run_start: Option<usize> = None;
                for (i, &byte) in bytes.iter().enumerate() {
                    if is_printable(byte) {
                        run_start.get_or_insert(i);
                        continue;
                    }
                    if let Some(start) = run_start.take() {
                        if byte == 0 && i - start >= min_len {
                            found.push(QuickString {
                                address: region.start.as_u64() + start as u64,
                                text: String::from_utf8_lossy(&bytes[start..i]).into_owned(),
                            });
                        }
                    }
                }
            } else {
                log::debug!("Skipping unreadable region {}", region.name);
            }
            ctx.report(done + 1, total);
        }

        log::debug!("Quick scan found {} strings in {} regions", found.len(), total);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::error::AnalysisError;
    use crate::container::testing::{MachOBuilder, IMAGE_BASE};
    use crate::container::{FlatImage, MachOContainer, MemoryReader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_prologue_patterns() {
        assert!(is_frame_record_push(0xa9bf7bfd));
        assert!(is_pre_index_push(0xa9bf7bfd));
        assert!(!is_pre_index_push(0xa9017bfd));
        assert!(is_stack_allocation(0xd10083ff));
        assert!(!is_stack_allocation(0xd10083e0));
    }

    #[test]
    fn test_function_starts_from_raw_words() {
        let words = [
            0xa9bf7bfd, 0x910003fd, 0xa8c17bfd, 0xd65f03c0, // 0x00
            0xd503237f, 0xa9bf7bfd, 0xd65f0fff, //              0x10
            0xd10083ff, 0xa9017bfd, 0x910043fd, 0xd65f03c0, // 0x1c
        ];
        let image: Arc<dyn MemoryReader> = Arc::new(FlatImage::from_words(0x4000, &words));
        let disasm = LazyDisassembler::new(image, 8);
        assert_eq!(disasm.find_function_starts(), vec![0x4000, 0x4010, 0x401c]);
    }

    fn string_image() -> LazyDisassembler {
        let bytes = MachOBuilder::new()
            .text(IMAGE_BASE + 0x1000, &[0xd65f03c0])
            .cstrings(IMAGE_BASE + 0x2000, &["hello world", "ab", "\u{1}badly", "count=%d"])
            .section("__DATA", "__data", IMAGE_BASE + 0x4000, b"config\0".to_vec())
            .build();
        let container = MachOContainer::from_bytes(bytes).unwrap();
        LazyDisassembler::new(Arc::new(container), 8)
    }

    #[test]
    fn test_quick_strings_skip_code_and_short_runs() {
        let disasm = string_image();

        let strings = disasm.extract_strings_quick(4, &AnalysisContext::new()).unwrap();
        let texts: Vec<&str> = strings.iter().map(|s| s.text.as_str()).collect();
        assert!(texts.contains(&"hello world"));
        assert!(texts.contains(&"count=%d"));
        assert!(!texts.contains(&"ab"));
        assert!(texts.contains(&"badly"));
        let hello = strings.iter().find(|s| s.text == "hello world").unwrap();
        assert_eq!(hello.address, IMAGE_BASE + 0x2000);
    }

    #[test]
    fn test_quick_strings_report_progress_per_region() {
        let disasm = string_image();
        let calls = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let (c, l) = (calls.clone(), last.clone());
        let ctx = AnalysisContext::new().with_progress(move |done, total| {
            c.fetch_add(1, Ordering::SeqCst);
            assert!(done <= total);
            l.store(done, Ordering::SeqCst);
        });

        let strings = disasm.extract_strings_quick(4, &ctx).unwrap();
        assert!(strings.iter().any(|s| s.text == "config"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(last.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancelled_string_scan_stops() {
        let disasm = string_image();
        let ctx = AnalysisContext::new();
        ctx.cancel();
        assert!(matches!(disasm.extract_strings_quick(4, &ctx), Err(AnalysisError::Cancelled)));
    }
}
