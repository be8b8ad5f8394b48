#![no_main]

use libfuzzer_sys::fuzz_target;
use partstream::{Constraints, Event, PartAssembler};

fn run(chunks: &[&[u8]]) -> (Vec<Event>, bool) {
    let mut assembler = PartAssembler::new("X-BOUNDARY", Constraints::new()).expect("assembler");
    let mut failed = false;

    for chunk in chunks {
        failed |= assembler.write(chunk).is_err();
    }
    failed |= assembler.end().is_err();

    let mut events: Vec<Event> = Vec::new();
    while let Some(event) = assembler.next_event() {
        if let (Some(Event::PartData(acc)), Event::PartData(more)) = (events.last_mut(), &event) {
            let mut joined = acc.to_vec();
            joined.extend_from_slice(more);
            *acc = joined.into();
            continue;
        }
        events.push(event);
    }

    (events, failed)
}

// Splitting the input must not change the outcome of a successful parse.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let split = data[0] as usize % data.len();
    let data = &data[1..];
    let split = split.min(data.len());

    let (whole, whole_failed) = run(&[data]);
    let (parts, parts_failed) = run(&[&data[..split], &data[split..]]);

    if !whole_failed && !parts_failed {
        assert_eq!(whole, parts);
    }
});
