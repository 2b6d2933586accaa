use super::*;

#[test]
fn record_last_write_wins() {
    let mut effects = Effects::new();
    assert_eq!(effects.record(&"a", KeyEffect::Update), Recorded::Changed);
    assert_eq!(effects.record(&"a", KeyEffect::Update), Recorded::Unchanged);
    assert_eq!(effects.record(&"a", KeyEffect::Remove), Recorded::Changed);
    assert_eq!(effects.len(), 1);
    assert_eq!(effects.get(&"a"), Some(KeyEffect::Remove));

    assert_eq!(effects.record(&"a", KeyEffect::Update), Recorded::Changed);
    assert_eq!(effects.get(&"a"), Some(KeyEffect::Update));
}

#[test]
fn take_empties_the_set() {
    let mut effects = Effects::new();
    effects.record(&2, KeyEffect::Remove);
    effects.record(&1, KeyEffect::Update);
    assert_eq!(
        effects.take(),
        vec![(1, KeyEffect::Update), (2, KeyEffect::Remove)]
    );
    assert!(effects.is_empty());
}

#[test]
fn ledger_rejects_foreign_keys() {
    let mut ledger = new_key_ledger::<u32>();
    assert_eq!(ledger.record(&1u32, KeyEffect::Update), Recorded::Changed);
    assert_eq!(ledger.record(&"x", KeyEffect::Update), Recorded::Foreign);
}

#[test]
fn apply_shares_untouched_entries() {
    let mut state = MapState::<&str, i32>::new();
    state.apply(&"a", Some(Rc::new(1)));
    state.apply(&"b", Some(Rc::new(2)));
    let before = state.map.clone();

    assert!(state.apply(&"a", Some(Rc::new(5))));
    let after = state.map.clone();

    assert_eq!(**after.get(&"a").unwrap(), 5);
    assert!(Rc::ptr_eq(
        before.get(&"b").unwrap(),
        after.get(&"b").unwrap()
    ));
    assert_eq!(**before.get(&"a").unwrap(), 1);
}

#[test]
fn apply_same_rc_is_no_change() {
    let mut state = MapState::<u8, String>::new();
    let value = Rc::new("x".to_string());
    assert!(state.apply(&0, Some(value.clone())));
    assert!(!state.apply(&0, Some(value)));
    assert!(state.apply(&0, None));
    assert!(!state.apply(&0, None));
}

#[test]
fn cell_keys_include_pending() {
    let mut state = MapState::<u8, u8>::new();
    state.apply(&1, Some(Rc::new(1)));
    let cell: &mut dyn MapCell = &mut state;
    cell.record(&2u8, KeyEffect::Update);
    cell.record(&1u8, KeyEffect::Update);

    let mut keys: Vec<u8> = cell
        .keys()
        .into_iter()
        .map(|key| *key.downcast::<u8>().unwrap())
        .collect();
    keys.sort();
    assert_eq!(keys, vec![1, 2]);
    assert_eq!(cell.pending_len(), 2);
}

#[test]
fn key_effect_display() {
    assert_eq!(KeyEffect::Update.to_string(), "update");
    assert_eq!(KeyEffect::Remove.to_string(), "remove");
}

#[test]
fn key_outlet_is_released_only_for_absent_keys() {
    let mut state = MapState::<u32, u32>::new();
    state.apply(&1, Some(Rc::new(10)));
    state.key_outlets.insert(1, 7);
    state.key_outlets.insert(2, 8);
    state.pending.record(&2, KeyEffect::Update);

    assert!(!state.release_key_outlet(7));
    assert!(!state.release_key_outlet(8));
    assert!(!state.release_key_outlet(9));

    state.apply(&1, None);
    state.pending.record(&2, KeyEffect::Remove);
    assert!(state.release_key_outlet(7));
    assert!(state.release_key_outlet(8));
    assert!(state.key_outlets.is_empty());
}
