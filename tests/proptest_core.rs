use proptest::prelude::*;

use dhcpwarden::addr::{self, MacAddr};
use dhcpwarden::LeaseTime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10000))]

    #[test]
    fn address_parse_never_panics_on_arbitrary_text(text in "\\PC*") {
        let _ = addr::parse(&text);
    }

    #[test]
    fn address_ordinal_round_trips(ordinal in any::<u32>()) {
        let text = addr::format(ordinal);
        prop_assert_eq!(addr::parse(&text).unwrap(), ordinal);
    }

    #[test]
    fn address_text_round_trips(octets in any::<[u8; 4]>()) {
        let text = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
        let ordinal = addr::parse(&text).unwrap();
        prop_assert_eq!(addr::format(ordinal), text);
    }

    #[test]
    fn address_parse_rejects_out_of_range_octets(
        prefix in 0u8..=255,
        bad in 256u32..=99999,
    ) {
        let text = format!("{prefix}.0.0.{bad}");
        prop_assert!(addr::parse(&text).is_err());
    }

    #[test]
    fn range_size_matches_membership_count(start in any::<u32>(), span in 0u32..512) {
        let end = start.saturating_add(span);
        let size = addr::range_size(start, end);
        let counted = (start..=end).filter(|&x| addr::in_range(x, start, end)).count() as u64;
        prop_assert_eq!(size, counted);
    }

    #[test]
    fn mac_round_trips(octets in any::<[u8; 6]>()) {
        let mac = MacAddr::from(octets);
        let parsed: MacAddr = mac.to_string().parse().unwrap();
        prop_assert_eq!(parsed, mac);
    }

    #[test]
    fn mac_parse_never_panics_on_arbitrary_text(text in "\\PC*") {
        let _ = text.parse::<MacAddr>();
    }

    #[test]
    fn mac_parse_accepts_dashes_and_uppercase(octets in any::<[u8; 6]>()) {
        let dashed = octets
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join("-");
        let parsed: MacAddr = dashed.parse().unwrap();
        prop_assert_eq!(parsed, MacAddr::from(octets));
    }

    #[test]
    fn lease_time_never_panics(text in "\\PC*") {
        let _ = LeaseTime::parse(&text);
    }

    #[test]
    fn lease_time_applies_unit_multiplier(magnitude in 0u32..10000) {
        prop_assert_eq!(LeaseTime::parse(&format!("{magnitude} seconds")).seconds(), magnitude);
        prop_assert_eq!(
            LeaseTime::parse(&format!("{magnitude} minutes")).seconds(),
            magnitude * 60
        );
        prop_assert_eq!(
            LeaseTime::parse(&format!("{magnitude} hours")).seconds(),
            magnitude * 3600
        );
    }

    #[test]
    fn lease_time_unparseable_defaults_to_a_day(text in "[a-z ]{0,20}") {
        // No digits anywhere, so no magnitude can parse.
        prop_assert_eq!(LeaseTime::parse(&text).seconds(), 86_400);
    }
}
