use persistence_core::{
    values, AttributeType, ChangeSummary, ConcurrencyKind, ContextError, EntityDescription,
    FetchRequest, ObjectId, PersistenceCoordinator, Schema, StoreLocation, ValidationError, Value,
    Values,
};
use std::path::Path;

fn library_schema() -> Schema {
    Schema::new("library")
        .with_entity(
            EntityDescription::new("Book")
                .attribute("title", AttributeType::Text)
                .optional_attribute("pages", AttributeType::Integer)
                .optional_attribute("read", AttributeType::Boolean)
                .optional_attribute("rating", AttributeType::Real)
                .relationship("shelf", "Shelf", false),
        )
        .with_entity(
            EntityDescription::new("Shelf")
                .attribute("label", AttributeType::Text)
                .relationship("books", "Book", true),
        )
}

fn book(title: &str, pages: i64) -> Values {
    values([("title", Value::from(title)), ("pages", Value::from(pages))])
}

fn in_memory() -> PersistenceCoordinator {
    PersistenceCoordinator::new(StoreLocation::InMemory, library_schema()).unwrap()
}

fn book_count(coordinator: &PersistenceCoordinator) -> usize {
    coordinator
        .context()
        .perform_and_wait(|session| session.fetch(&FetchRequest::new("Book")))
        .unwrap()
        .unwrap()
        .len()
}

fn titles_on_disk(path: &Path) -> Vec<String> {
    let reopened = PersistenceCoordinator::new(path, library_schema()).unwrap();
    let books = reopened
        .context()
        .perform_and_wait(|session| session.fetch(&FetchRequest::new("Book")))
        .unwrap()
        .unwrap();
    let mut titles: Vec<String> = books
        .iter()
        .filter_map(|book| book.get("title").and_then(|value| value.as_str()))
        .map(str::to_string)
        .collect();
    titles.sort();
    titles
}

#[test]
fn both_child_factories_parent_to_the_root() {
    let coordinator = in_memory();
    let root = coordinator.context();

    let background = coordinator.new_background_child_context().unwrap();
    let foreground = coordinator.new_foreground_child_context();

    assert!(background.parent().unwrap().same_context(root));
    assert!(foreground.parent().unwrap().same_context(root));
    assert_eq!(background.kind(), ConcurrencyKind::Background);
    assert_eq!(foreground.kind(), ConcurrencyKind::Main);
    assert_eq!(foreground.queue_label(), root.queue_label());
    assert_ne!(background.queue_label(), root.queue_label());
    assert!(!background.is_root());
}

#[test]
fn background_children_get_distinct_queues() {
    let coordinator = in_memory();
    let first = coordinator.new_background_child_context().unwrap();
    let second = coordinator.new_background_child_context().unwrap();

    assert_ne!(first.queue_label(), second.queue_label());
    assert!(first
        .queue_label()
        .starts_with(&coordinator.config().background_queue_label));
}

#[test]
fn child_changes_stay_invisible_to_root_until_child_saves() {
    let coordinator = in_memory();
    let child = coordinator.new_background_child_context().unwrap();

    let id = child
        .perform_and_wait(|session| session.insert("Book", values([("title", "Lilith's Brood")])))
        .unwrap()
        .unwrap();
    let seen_by_root = coordinator
        .context()
        .perform_and_wait(move |session| session.get(id))
        .unwrap()
        .unwrap();
    assert!(seen_by_root.is_none());

    let saved = child
        .perform_and_wait(|session| session.save())
        .unwrap()
        .unwrap();
    assert_eq!(
        saved,
        ChangeSummary {
            inserted: 1,
            updated: 0,
            deleted: 0,
        }
    );
    let root_pending = coordinator
        .context()
        .perform_and_wait(|session| session.pending_summary())
        .unwrap();
    assert_eq!(root_pending.inserted, 1);
    assert!(!child.perform_and_wait(|session| session.has_changes()).unwrap());
}

#[test]
fn foreground_child_saves_into_root_on_the_shared_queue() {
    let coordinator = in_memory();
    let foreground = coordinator.new_foreground_child_context();

    foreground
        .perform_and_wait(|session| {
            session.insert("Book", values([("title", "Wild Seed")]))?;
            session.save()
        })
        .unwrap()
        .unwrap();

    assert_eq!(book_count(&coordinator), 1);
}

#[test]
fn sibling_background_children_are_isolated_until_both_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.sqlite");
    let coordinator = PersistenceCoordinator::new(path.as_path(), library_schema()).unwrap();
    let first = coordinator.new_background_child_context().unwrap();
    let second = coordinator.new_background_child_context().unwrap();

    let first_id = first
        .perform_and_wait(|session| session.insert("Book", values([("title", "Imago")])))
        .unwrap()
        .unwrap();
    let second_id = second
        .perform_and_wait(|session| session.insert("Book", values([("title", "Adulthood Rites")])))
        .unwrap()
        .unwrap();

    let first_sees_second = first
        .perform_and_wait(move |session| session.get(second_id))
        .unwrap()
        .unwrap();
    let second_sees_first = second
        .perform_and_wait(move |session| session.get(first_id))
        .unwrap()
        .unwrap();
    assert!(first_sees_second.is_none());
    assert!(second_sees_first.is_none());
    assert_eq!(book_count(&coordinator), 0);

    let saves = [first.clone(), second.clone()].map(|child| {
        std::thread::spawn(move || child.perform_and_wait(|session| session.save()))
    });
    for save in saves {
        save.join().unwrap().unwrap().unwrap();
    }
    assert_eq!(book_count(&coordinator), 2);
    assert!(titles_on_disk(&path).is_empty());

    coordinator.save_and_wait(true).unwrap();
    drop(coordinator);
    assert_eq!(titles_on_disk(&path), vec!["Adulthood Rites", "Imago"]);
}

#[test]
fn nested_child_saves_travel_one_level_at_a_time() {
    let coordinator = in_memory();
    let child = coordinator.new_background_child_context().unwrap();
    let grandchild = child.new_background_child().unwrap();
    assert!(grandchild.parent().unwrap().same_context(&child));
    assert_eq!(grandchild.kind(), ConcurrencyKind::Background);

    grandchild
        .perform_and_wait(|session| {
            session.insert("Book", values([("title", "Fledgling")]))?;
            session.save()
        })
        .unwrap()
        .unwrap();

    let in_child = child
        .perform_and_wait(|session| session.fetch(&FetchRequest::new("Book")))
        .unwrap()
        .unwrap();
    assert_eq!(in_child.len(), 1);
    assert_eq!(book_count(&coordinator), 0);

    child
        .perform_and_wait(|session| session.save())
        .unwrap()
        .unwrap();
    assert_eq!(book_count(&coordinator), 1);
}

#[test]
fn update_and_delete_fold_over_parent_state() {
    let coordinator = in_memory();
    let id = coordinator
        .context()
        .perform_and_wait(|session| {
            session.insert("Book", book("Kindred", 264))
        })
        .unwrap()
        .unwrap();
    coordinator.save_and_wait(true).unwrap();

    let child = coordinator.new_background_child_context().unwrap();
    let updated = child
        .perform_and_wait(move |session| {
            session.update(id, values([("read", Value::Boolean(true)), ("pages", Value::Null)]))?;
            session.get(id)
        })
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("read"), Some(&Value::Boolean(true)));
    assert_eq!(updated.get("pages"), None);
    assert_eq!(updated.get("title").and_then(|value| value.as_str()), Some("Kindred"));

    let summary = child
        .perform_and_wait(move |session| {
            session.delete(id)?;
            assert!(session.get(id)?.is_none());
            session.save()
        })
        .unwrap()
        .unwrap();
    assert_eq!(summary.deleted, 1);

    coordinator.save_and_wait(true).unwrap();
    assert_eq!(book_count(&coordinator), 0);
}

#[test]
fn fetch_applies_filters_and_limit_over_pending_and_stored_objects() {
    let coordinator = in_memory();
    coordinator
        .context()
        .perform_and_wait(|session| {
            session.insert("Book", book("Dawn", 248))?;
            session.insert("Book", book("Kindred", 264))
        })
        .unwrap()
        .unwrap();
    coordinator.save_and_wait(true).unwrap();

    let child = coordinator.new_background_child_context().unwrap();
    let (short, unread, limited) = child
        .perform_and_wait(|session| {
            session.insert("Book", book("Bloodchild", 248))?;
            let short = session.fetch(&FetchRequest::new("Book").filter("pages", 248_i64))?;
            let unread = session.fetch(&FetchRequest::new("Book").filter("read", Value::Null))?;
            let limited = session.fetch(&FetchRequest::new("Book").limit(2))?;
            Ok::<_, ContextError>((short, unread, limited))
        })
        .unwrap()
        .unwrap();

    assert_eq!(short.len(), 2);
    assert_eq!(unread.len(), 3);
    assert_eq!(limited.len(), 2);
    let ids: Vec<ObjectId> = limited.iter().map(|book| book.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn relationships_hold_references_to_other_objects() {
    let coordinator = in_memory();
    let (shelf, book) = coordinator
        .context()
        .perform_and_wait(|session| {
            let shelf = session.insert("Shelf", values([("label", "Butler")]))?;
            let book = session.insert(
                "Book",
                values([
                    ("title", Value::from("Kindred")),
                    ("shelf", Value::Reference(shelf)),
                ]),
            )?;
            session.update(shelf, values([("books", Value::ReferenceList(vec![book]))]))?;
            Ok::<_, ContextError>((shelf, book))
        })
        .unwrap()
        .unwrap();
    coordinator.save_and_wait(true).unwrap();

    let stored = coordinator
        .context()
        .perform_and_wait(move |session| session.get(book))
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("shelf"), Some(&Value::Reference(shelf)));
}

#[test]
fn rollback_discards_only_local_changes() {
    let coordinator = in_memory();
    let child = coordinator.new_background_child_context().unwrap();

    let still_visible = child
        .perform_and_wait(|session| {
            session.insert("Book", values([("title", "Survivor")]))?;
            assert!(session.has_changes());
            session.rollback();
            Ok::<_, ContextError>(session.fetch(&FetchRequest::new("Book"))?.len())
        })
        .unwrap()
        .unwrap();

    assert_eq!(still_visible, 0);
    let summary = child
        .perform_and_wait(|session| session.save())
        .unwrap()
        .unwrap();
    assert_eq!(summary.total(), 0);
}

#[test]
fn invalid_writes_are_rejected_without_recording_changes() {
    let coordinator = in_memory();
    let root = coordinator.context();

    let missing = root
        .perform_and_wait(|session| session.insert("Book", values([("pages", 12_i64)])))
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        missing,
        ContextError::Validation(ValidationError::MissingRequired { .. })
    ));

    let mismatched = root
        .perform_and_wait(|session| session.insert("Book", values([("title", 7_i64)])))
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        mismatched,
        ContextError::Validation(ValidationError::TypeMismatch { .. })
    ));

    let unknown = root
        .perform_and_wait(|session| session.insert("Magazine", values([("title", "Omni")])))
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        unknown,
        ContextError::Validation(ValidationError::UnknownEntity(_))
    ));

    let ghost = ObjectId::new();
    let not_found = root
        .perform_and_wait(move |session| session.delete(ghost))
        .unwrap()
        .unwrap_err();
    assert!(matches!(not_found, ContextError::ObjectNotFound(id) if id == ghost));

    assert!(!root.perform_and_wait(|session| session.has_changes()).unwrap());
}

#[test]
fn panicking_work_does_not_poison_the_context() {
    let coordinator = in_memory();
    let child = coordinator.new_background_child_context().unwrap();

    let failed = child.perform_and_wait(|_| -> u8 { panic!("work failed") });
    assert!(matches!(failed, Err(ContextError::Queue(_))));

    child
        .perform_and_wait(|session| session.insert("Book", values([("title", "Clay's Ark")])))
        .unwrap()
        .unwrap();
}

#[test]
fn non_finite_reals_are_rejected_and_reads_keep_working() {
    let coordinator = in_memory();
    let root = coordinator.context();

    let rejected = root
        .perform_and_wait(|session| {
            let mut dune = book("Dune", 412);
            dune.insert("rating".to_string(), Value::Real(f64::NAN));
            session.insert("Book", dune)
        })
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        rejected,
        ContextError::Validation(ValidationError::TypeMismatch { .. })
    ));

    let id = root
        .perform_and_wait(|session| session.insert("Book", book("Dune", 412)))
        .unwrap()
        .unwrap();
    let rejected_update = root
        .perform_and_wait(move |session| {
            session.update(id, values([("rating", Value::Real(f64::INFINITY))]))
        })
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        rejected_update,
        ContextError::Validation(ValidationError::TypeMismatch { .. })
    ));

    coordinator.save_and_wait(true).unwrap();
    let books = root
        .perform_and_wait(|session| session.fetch(&FetchRequest::new("Book")))
        .unwrap()
        .unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].get("rating"), None);
}

#[test]
fn references_must_point_at_visible_objects_of_the_destination() {
    let coordinator = in_memory();
    let root = coordinator.context();
    let ghost = ObjectId::new();

    let dangling = root
        .perform_and_wait(move |session| {
            session.insert(
                "Book",
                values([
                    ("title", Value::from("Kindred")),
                    ("shelf", Value::Reference(ghost)),
                ]),
            )
        })
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        dangling,
        ContextError::Validation(ValidationError::InvalidReference { target, .. }) if target == ghost
    ));

    let dawn = root
        .perform_and_wait(|session| session.insert("Book", book("Dawn", 248)))
        .unwrap()
        .unwrap();
    let wrong_entity = root
        .perform_and_wait(move |session| {
            session.insert(
                "Book",
                values([
                    ("title", Value::from("Imago")),
                    ("shelf", Value::Reference(dawn)),
                ]),
            )
        })
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        wrong_entity,
        ContextError::Validation(ValidationError::InvalidReference { ref destination, .. })
            if destination == "Shelf"
    ));

    let child = coordinator.new_background_child_context().unwrap();
    let private_shelf = child
        .perform_and_wait(|session| session.insert("Shelf", values([("label", "Butler")])))
        .unwrap()
        .unwrap();
    let hidden = root
        .perform_and_wait(move |session| {
            session.update(dawn, values([("shelf", Value::Reference(private_shelf))]))
        })
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        hidden,
        ContextError::Validation(ValidationError::InvalidReference { .. })
    ));

    child
        .perform_and_wait(|session| session.save())
        .unwrap()
        .unwrap();
    root.perform_and_wait(move |session| {
        session.update(dawn, values([("shelf", Value::Reference(private_shelf))]))
    })
    .unwrap()
    .unwrap();
}

#[test]
fn background_fetches_stay_complete_while_root_saves_asynchronously() {
    let coordinator = in_memory();
    let child = coordinator.new_background_child_context().unwrap();
    let mut expected = 0;

    for round in 0..40 {
        coordinator
            .context()
            .perform_and_wait(|session| {
                for pages in 0..25 {
                    session.insert("Book", book("Batch", pages))?;
                }
                Ok::<_, ContextError>(())
            })
            .unwrap()
            .unwrap();
        expected += 25;
        coordinator.save_and_wait(false).unwrap();

        for _ in 0..5 {
            let seen = child
                .perform_and_wait(|session| session.fetch(&FetchRequest::new("Book")))
                .unwrap()
                .unwrap()
                .len();
            assert_eq!(seen, expected, "round {round}");
        }
    }

    coordinator.save_and_wait(true).unwrap();
    assert_eq!(book_count(&coordinator), expected);
}
