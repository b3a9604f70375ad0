use serde_json::Value;
use zonecache_core::{AllocFlags, ZoneConfig};
use zonecache_harness::{FlagLayoutReport, ZoneTableReport, parse_flags};

#[test]
fn flag_layout_json_lists_every_bit_in_order() {
    let json = serde_json::to_value(FlagLayoutReport::current()).unwrap();
    let flags = json["flags"].as_array().unwrap();
    assert_eq!(flags[0]["name"], "DMA");
    assert_eq!(flags[0]["group"], "zone");
    for (i, flag) in flags.iter().enumerate() {
        assert_eq!(flag["bits"].as_u64(), Some(1 << i));
    }
    let kernel = json["presets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "KERNEL")
        .unwrap();
    assert_eq!(kernel["bits"].as_u64(), Some(u64::from(AllocFlags::KERNEL.bits())));
}

#[test]
fn zone_table_json_marks_invalid_patterns() {
    let report = ZoneTableReport::for_config(ZoneConfig::minimal());
    let json = serde_json::to_value(&report).unwrap();
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 16);
    let invalid: Vec<u64> = entries
        .iter()
        .filter(|e| e["zone"] == Value::Null)
        .map(|e| e["bits"].as_u64().unwrap())
        .collect();
    assert_eq!(invalid, vec![0x3, 0x5, 0x6, 0x7, 0xb, 0xd, 0xe, 0xf]);
    assert_eq!(entries[0x1]["zone"], "normal");
    assert_eq!(entries[0xa]["zone"], "movable");
    assert_eq!(report.invalid_bitmap, "0xe8e8");
}

#[test]
fn flag_words_parse_like_the_published_names() {
    let parsed = parse_flags("HIGHUSER_MOVABLE|NOFAIL").unwrap();
    assert_eq!(parsed, AllocFlags::HIGHUSER_MOVABLE | AllocFlags::NOFAIL);
    assert_eq!(
        parse_flags("0x8|0x10").unwrap(),
        AllocFlags::MOVABLE | AllocFlags::RECLAIMABLE
    );
}
