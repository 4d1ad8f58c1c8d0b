//! Scene files stay attached to their scenes across structural edits.
//!
//! Runs random insert/delete/reorder sequences through the project store
//! and file layout, checking after every step that each scene's files
//! carry that scene's id and that nothing is left past the last scene.

use kodan_project::{FileLayout, InsertAt, Project, ProjectHandle, ProjectStore, Scene, StoreKind};
use proptest::prelude::*;
use std::fs;

#[derive(Debug, Clone)]
enum Edit {
    Insert { at: usize, files: [bool; 4] },
    Delete { at: usize },
    Reorder { keys: Vec<u32> },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<usize>(), any::<[bool; 4]>()).prop_map(|(at, files)| Edit::Insert { at, files }),
        any::<usize>().prop_map(|at| Edit::Delete { at }),
        prop::collection::vec(any::<u32>(), 0..12).prop_map(|keys| Edit::Reorder { keys }),
    ]
}

/// What should be on disk: per scene, its id and which stores hold a file.
type Model = Vec<(u64, [bool; 4])>;

fn write_files(layout: &FileLayout, position: usize, id: u64, files: [bool; 4]) {
    for (kind, present) in StoreKind::ALL.into_iter().zip(files) {
        if present {
            fs::write(layout.path_for(kind, position), id.to_string()).unwrap();
        }
    }
}

fn check(layout: &FileLayout, project: &Project, model: &Model) {
    let ids: Vec<u64> = project.scenes.iter().map(|s| s.id).collect();
    let expected: Vec<u64> = model.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, expected);

    for (i, (id, files)) in model.iter().enumerate() {
        let position = i + 1;
        for (kind, present) in StoreKind::ALL.into_iter().zip(*files) {
            let content = fs::read_to_string(layout.path_for(kind, position)).ok();
            let want = present.then(|| id.to_string());
            assert_eq!(content, want, "{kind:?} at position {position}");
        }
    }
    for kind in StoreKind::ALL {
        let present = layout.positions_present(kind).unwrap();
        assert!(present.iter().all(|&p| p <= model.len()), "{kind:?}: {present:?}");
    }
}

fn run(initial: Vec<[bool; 4]>, edits: Vec<Edit>) {
    let tmp = tempfile::tempdir().unwrap();
    let handle = ProjectHandle::new(tmp.path());
    let layout = handle.layout();
    layout.ensure_dirs().unwrap();
    let store = ProjectStore::new(handle);

    let mut project = Project::new("Renumbering");
    let mut model: Model = Vec::new();
    for (i, files) in initial.into_iter().enumerate() {
        let scene = Scene::new();
        write_files(&layout, i + 1, scene.id, files);
        model.push((scene.id, files));
        project.scenes.push(scene);
    }
    store.save(&project).unwrap();

    for edit in edits {
        let count = model.len();
        match edit {
            Edit::Insert { at, files } => {
                let at = InsertAt::Position(1 + at % (count + 1));
                let (position, report) = store.update(|p| layout.insert_scene(p, at)).unwrap();
                assert!(report.is_clean());
                let id = store.load().unwrap().scenes[position - 1].id;
                write_files(&layout, position, id, files);
                model.insert(position - 1, (id, files));
            }
            Edit::Delete { at } if count > 0 => {
                let position = 1 + at % count;
                let report = store.update(|p| layout.delete_scene(p, position)).unwrap();
                assert!(report.is_clean());
                model.remove(position - 1);
            }
            Edit::Delete { .. } => continue,
            Edit::Reorder { keys } => {
                // Sort positions by random keys to get a permutation.
                let mut new_order: Vec<usize> = (1..=count).collect();
                new_order.sort_by_key(|&p| keys.get(p - 1).copied().unwrap_or(0));
                let report = store.update(|p| layout.reorder(p, &new_order)).unwrap();
                assert!(report.is_clean());
                model = new_order.iter().map(|&old| model[old - 1]).collect();
            }
        }
        check(&layout, &store.load().unwrap(), &model);
    }
}

#[test]
fn files_follow_scenes_through_mixed_edits() {
    run(
        vec![[true, true, true, true], [true, false, true, false], [false; 4]],
        vec![
            Edit::Reorder { keys: vec![3, 1, 2] },
            Edit::Insert {
                at: 1,
                files: [true, false, false, true],
            },
            Edit::Delete { at: 0 },
            Edit::Reorder {
                keys: vec![9, 8, 7],
            },
            Edit::Insert {
                at: 99,
                files: [true; 4],
            },
        ],
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_files_follow_scenes(
        initial in prop::collection::vec(any::<[bool; 4]>(), 0..6),
        edits in prop::collection::vec(edit(), 1..10),
    ) {
        run(initial, edits);
    }
}
