//! Tests for communication::line_framer

use printgate_communication::LineFramer;
use proptest::prelude::*;

fn wire(lines: &[String], crlf: bool) -> Vec<u8> {
    let term = if crlf { "\r\n" } else { "\n" };
    lines.iter().flat_map(|l| format!("{}{}", l, term).into_bytes()).collect()
}

proptest! {
    #[test]
    fn prop_fragmentation_does_not_change_lines(
        lines in prop::collection::vec("[ -~]{0,40}", 0..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
        crlf in any::<bool>(),
    ) {
        let bytes = wire(&lines, crlf);
        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
        points.push(0);
        points.push(bytes.len());
        points.sort_unstable();
        points.dedup();

        let mut framer = LineFramer::new();
        let mut out = Vec::new();
        for pair in points.windows(2) {
            out.extend(framer.push(&bytes[pair[0]..pair[1]]));
        }
        prop_assert_eq!(out, lines);
        prop_assert!(framer.buffered().is_empty());
    }
}

#[test]
fn test_partial_line_waits() {
    let mut framer = LineFramer::new();
    assert!(framer.push(b"ok T:21").is_empty());
    assert_eq!(framer.push(b".5\n"), vec!["ok T:21.5"]);
}

#[test]
fn test_upload_switch_keeps_tail() {
    let mut framer = LineFramer::new();
    framer.extend(b"*upload a.gcode\nG28\nG1 X1\n");
    assert_eq!(framer.next_line().as_deref(), Some("*upload a.gcode"));
    framer.set_enabled(false);
    assert_eq!(framer.next_line(), None);
    framer.extend(b"G1 X2\n");
    assert_eq!(framer.take_buffer(), b"G28\nG1 X1\nG1 X2\n");
}
