use proptest::prelude::*;

use c2p_core::model::attachment::{MIME_PNG, MIME_SVG};
use c2p_core::model::{Attachment, AttributeValue, LazyContent, Link, TextContent, WorkItem, link_delta};

fn arb_link() -> impl Strategy<Value = Link> {
    ("P-[0-9]{1,2}", prop::sample::select(vec!["parent", "realizes", "exchanges"]))
        .prop_map(|(secondary, role)| Link::new("P-0", secondary, role, "PROJ"))
}

fn arb_links() -> impl Strategy<Value = Vec<Link>> {
    prop::collection::vec(arb_link(), 0..12).prop_map(|mut links| {
        links.sort_by_key(Link::key);
        links.dedup();
        links
    })
}

fn item_with(links: Vec<Link>, attachments: Vec<Attachment>) -> WorkItem {
    let mut item = WorkItem::new("e1", "class", "Door").with_id("P-0");
    item.description = Some(TextContent::html("<p>A door</p>"));
    item.additional_attributes
        .insert("owner".to_string(), AttributeValue::from("alice"));
    item.linked_items = links;
    for attachment in attachments {
        item.add_attachment(attachment);
    }
    item
}

fn diagram_pair(name: &str, bytes: &[u8]) -> Vec<Attachment> {
    vec![
        Attachment::new(format!("{name}.svg"), name, MIME_SVG, LazyContent::eager(bytes.to_vec())),
        Attachment::new(format!("{name}.png"), name, MIME_PNG, LazyContent::eager(bytes.to_vec())),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn link_order_does_not_change_checksum(links in arb_links(), rotate in 0usize..12) {
        let mut shuffled = links.clone();
        if !shuffled.is_empty() {
            let len = shuffled.len();
            shuffled.rotate_left(rotate % len);
            shuffled.reverse();
        }
        let mut a = item_with(links, Vec::new());
        let mut b = item_with(shuffled, Vec::new());
        prop_assert_eq!(a.calculate_checksum(), b.calculate_checksum());
    }

    #[test]
    fn attachment_order_does_not_change_checksum(names in prop::collection::btree_set("[a-z]{1,6}", 1..5)) {
        let attachments: Vec<Attachment> = names
            .iter()
            .flat_map(|name| diagram_pair(name, name.as_bytes()))
            .collect();
        let mut reversed = attachments.clone();
        reversed.reverse();

        let mut a = item_with(Vec::new(), attachments);
        let mut b = item_with(Vec::new(), reversed);
        prop_assert_eq!(a.calculate_checksum(), b.calculate_checksum());
    }

    #[test]
    fn descriptions_compare_byte_exactly(text in "[a-z ]{1,20}", pad in " {1,3}") {
        let mut a = item_with(Vec::new(), Vec::new());
        let mut b = a.clone();
        let mut c = a.clone();
        a.description = Some(TextContent::html(format!("<p>{text}</p>")));
        b.description = Some(TextContent::html(format!("<p>{text}</p>")));
        c.description = Some(TextContent::html(format!("<p>{text}{pad}</p>")));
        let checksum = a.calculate_checksum();
        prop_assert_eq!(&checksum, &b.calculate_checksum());
        prop_assert_ne!(&checksum, &c.calculate_checksum());
    }

    #[test]
    fn link_delta_transforms_old_into_new(old in arb_links(), new in arb_links()) {
        let delta = link_delta(&old, &new);
        let mut result: Vec<String> = old
            .iter()
            .filter(|link| !delta.to_delete.contains(link))
            .chain(&delta.to_create)
            .map(Link::key)
            .collect();
        result.sort();
        let mut expected: Vec<String> = new.iter().map(Link::key).collect();
        expected.sort();
        prop_assert_eq!(result, expected);

        for link in &delta.to_create {
            prop_assert!(!old.contains(link));
        }
        for link in &delta.to_delete {
            prop_assert!(!new.contains(link));
        }
    }
}

#[test]
fn png_sibling_decides_the_group_digest() {
    let mut svg_changed = diagram_pair("d", b"v1");
    svg_changed[0] = Attachment::new("d.svg", "d", MIME_SVG, LazyContent::eager(b"v2".to_vec()));

    let mut a = item_with(Vec::new(), diagram_pair("d", b"v1"));
    let mut b = item_with(Vec::new(), svg_changed);
    assert_eq!(a.calculate_checksum(), b.calculate_checksum());

    let mut c = item_with(Vec::new(), diagram_pair("d", b"v3"));
    assert_ne!(a.calculate_checksum(), c.calculate_checksum());
}
