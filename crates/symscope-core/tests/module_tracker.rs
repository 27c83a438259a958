mod common;

use std::sync::mpsc::Receiver;

use common::{ElfBuilder, FakeProcess, LinkerSymbol, MemoryImages};
use symscope_core::events::{event_channel, TrackerEvent};
use symscope_core::symbols::{DebugInfoStatus, ImageDescriptor, ModuleKind};
use symscope_core::tracker::DT_DEBUG;
use symscope_core::{Session, SymscopeError, TrackerState};

const BASE: u64 = 0x60_0000;
const EXE_BIAS: u64 = BASE;
const DYNAMIC: u64 = EXE_BIAS + 0x80;
const R_DEBUG: u64 = BASE + 0x4000;
const R_BRK: u64 = 0x7f00_dead_0000;
const NODES: u64 = BASE + 0x5000;
const NAMES: u64 = BASE + 0x6000;
const NODE_SIZE: u64 = 40;

/// A process with the executable plus a scripted link map.
struct Fixture
{
    process: FakeProcess,
    images: MemoryImages,
    session: Session,
    events: Receiver<TrackerEvent>,
    nodes: usize,
}

impl Fixture
{
    fn new() -> Self
    {
        let mut images = MemoryImages::new();
        images.insert(
            "/usr/bin/app",
            ElfBuilder::new()
                .symbol(LinkerSymbol::function("main", 0x10, 0x20))
                .symbol(LinkerSymbol::data("_DYNAMIC", 0x80, 0x40))
                .build(),
        );
        for (path, function) in [("/lib/liba.so", "a_fn"), ("/lib/libb.so", "b_fn"), ("/lib/libc.so", "c_fn")] {
            images.insert(path, ElfBuilder::new().symbol(LinkerSymbol::function(function, 0x10, 8)).build());
        }

        let mut process = FakeProcess::new(BASE, 0x10000);
        // Dynamic section: DT_NEEDED, DT_DEBUG, DT_NULL.
        process.write_u64(DYNAMIC, 1);
        process.write_u64(DYNAMIC + 8, 0x99);
        process.write_u64(DYNAMIC + 16, DT_DEBUG);
        process.write_u64(DYNAMIC + 24, R_DEBUG);
        process.write_u64(DYNAMIC + 32, 0);
        // r_debug: version, r_map, r_brk, r_state.
        process.write_u32(R_DEBUG, 1);
        process.write_u64(R_DEBUG + 8, NODES);
        process.write_u64(R_DEBUG + 16, R_BRK);
        process.write_u32(R_DEBUG + 24, 0);

        let (sender, events) = event_channel();
        let mut session = Session::default();
        session.set_event_sender(sender);

        let mut fixture = Self {
            process,
            images,
            session,
            events,
            nodes: 0,
        };
        // Head node: the executable, with an empty name.
        fixture.append_node("", 0);
        fixture
    }

    /// Append a `link_map` node and link it after the previous one.
    fn append_node(&mut self, path: &str, bias: u64)
    {
        let index = self.nodes as u64;
        let node = NODES + index * NODE_SIZE;
        let name = NAMES + index * 0x100;
        self.process.write_str(name, path);
        self.process.write_u64(node, bias);
        self.process.write_u64(node + 8, name);
        self.process.write_u64(node + 16, 0);
        self.process.write_u64(node + 24, 0);
        let prev = if index == 0 { 0 } else { node - NODE_SIZE };
        self.process.write_u64(node + 32, prev);
        if index > 0 {
            self.process.write_u64(prev + 24, node);
        }
        self.nodes += 1;
    }

    fn load_executable(&mut self)
    {
        let report = self
            .session
            .load_executable(&ImageDescriptor::new("/usr/bin/app", EXE_BIAS), &self.images);
        assert_eq!(report.status, DebugInfoStatus::Loaded);
    }

    fn attach(&mut self) -> symscope_core::Result<symscope_core::tracker::WalkSummary>
    {
        self.session.attach_process(&mut self.process, &self.images)
    }

    fn hit(&mut self) -> symscope_core::Result<symscope_core::tracker::WalkSummary>
    {
        self.session.on_rendezvous_hit(&mut self.process, &self.images)
    }

    fn drain_events(&self) -> Vec<TrackerEvent>
    {
        self.events.try_iter().collect()
    }
}

#[test]
fn test_initial_walk_then_one_new_module_on_hit()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.append_node("/lib/libb.so", 0x7f20_0000_0000);
    fx.load_executable();

    let first = fx.attach().unwrap();
    assert_eq!(first.visited, 3);
    assert_eq!(first.loaded.len(), 2);
    assert_eq!(fx.session.tracker().state(), TrackerState::Tracking);
    assert_eq!(fx.process.breakpoints, [symscope_core::Address::from(R_BRK)]);
    assert_eq!(fx.session.store().module_count(), 3);

    let a_fn = fx.session.store().lookup("a_fn")[0];
    assert_eq!(fx.session.store().symbol(a_fn).unwrap().address.value(), 0x7f10_0000_0010);
    let symbols_before = fx.session.store().symbol_count();
    let reads_before = fx.images.reads().len();

    fx.append_node("/lib/libc.so", 0x7f30_0000_0000);
    let second = fx.hit().unwrap();
    assert_eq!(second.loaded.len(), 1);
    assert_eq!(second.already_known, 2);
    assert_eq!(fx.session.store().module_count(), 4);
    assert_eq!(fx.session.store().symbol_count(), symbols_before + 1);
    // Only the new library was read from storage.
    assert_eq!(fx.images.reads()[reads_before..], [std::path::PathBuf::from("/lib/libc.so")]);

    let loaded: Vec<_> = fx
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            TrackerEvent::ModuleLoaded { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(loaded.len(), 3);

    let libc = fx.session.store().module(second.loaded[0]).unwrap();
    assert_eq!(libc.kind(), ModuleKind::SharedObject);
    assert_eq!(libc.bias(), 0x7f30_0000_0000);
}

#[test]
fn test_duplicate_pair_loads_once()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.load_executable();

    let summary = fx.attach().unwrap();
    assert_eq!(summary.loaded.len(), 1);
    assert_eq!(summary.already_known, 1);
    assert_eq!(fx.session.store().lookup("a_fn").len(), 1);

    let again = fx.hit().unwrap();
    assert!(again.loaded.is_empty());
    assert_eq!(fx.session.store().module_count(), 2);
}

#[test]
fn test_same_path_at_new_bias_is_a_new_module()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.append_node("/lib/liba.so", 0x7f40_0000_0000);
    fx.load_executable();

    let summary = fx.attach().unwrap();
    assert_eq!(summary.loaded.len(), 2);
    assert_eq!(fx.session.store().lookup("a_fn").len(), 2);
}

#[test]
fn test_failed_rescan_keeps_earlier_modules()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.load_executable();
    fx.attach().unwrap();
    fx.drain_events();

    // Point liba's l_next at unmapped memory.
    fx.process.write_u64(NODES + NODE_SIZE + 24, 0xdead_0000);
    let err = fx.hit().unwrap_err();
    assert!(matches!(err, SymscopeError::MemoryRead { address: 0xdead_0000, .. }));
    assert!(fx
        .drain_events()
        .iter()
        .any(|event| matches!(event, TrackerEvent::RescanAborted { .. })));

    assert_eq!(fx.session.tracker().state(), TrackerState::Tracking);
    assert_eq!(fx.session.store().module_count(), 2);
    assert_eq!(fx.session.store().lookup("a_fn").len(), 1);

    // Once the list is sane again the next hit succeeds.
    fx.process.write_u64(NODES + NODE_SIZE + 24, 0);
    assert!(fx.hit().is_ok());
}

#[test]
fn test_delete_phase_is_reported_not_applied()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.load_executable();
    fx.attach().unwrap();
    fx.drain_events();

    fx.process.write_u32(R_DEBUG + 24, 2);
    fx.hit().unwrap();
    assert!(fx.drain_events().contains(&TrackerEvent::UnloadIgnored));
    assert_eq!(fx.session.store().module_count(), 2);
}

#[test]
fn test_without_breakpoints_tracker_stays_attached()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.process.breakpoints_supported = false;
    fx.load_executable();

    let summary = fx.attach().unwrap();
    assert_eq!(summary.loaded.len(), 1);
    assert_eq!(fx.session.tracker().state(), TrackerState::Attached);
    assert!(matches!(fx.hit(), Err(SymscopeError::InvalidState(_))));
}

#[test]
fn test_missing_debug_tag_is_reported()
{
    let mut fx = Fixture::new();
    fx.process.write_u64(DYNAMIC + 16, 0);
    fx.load_executable();

    assert!(matches!(fx.attach(), Err(SymscopeError::RendezvousUnavailable(_))));
    assert_eq!(fx.session.tracker().state(), TrackerState::Uninitialized);
}

#[test]
fn test_corrupt_dynamic_tag_stops_the_scan()
{
    let mut fx = Fixture::new();
    fx.process.write_u64(DYNAMIC, 0x1234_5678_9abc);
    fx.load_executable();

    assert!(matches!(fx.attach(), Err(SymscopeError::RendezvousUnavailable(_))));
}

#[test]
fn test_attach_requires_executable()
{
    let mut fx = Fixture::new();
    assert!(matches!(fx.attach(), Err(SymscopeError::InvalidState(_))));
}

#[test]
fn test_unreadable_library_does_not_stop_the_walk()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/missing.so", 0x7f50_0000_0000);
    fx.append_node("/lib/libb.so", 0x7f20_0000_0000);
    fx.load_executable();

    let summary = fx.attach().unwrap();
    assert_eq!(summary.loaded.len(), 2);
    let statuses: Vec<_> = summary
        .loaded
        .iter()
        .map(|id| fx.session.store().module(*id).unwrap().status())
        .collect();
    assert_eq!(statuses, [DebugInfoStatus::Error, DebugInfoStatus::Loaded]);
}

#[test]
fn test_unreadable_rendezvous_header_allows_a_second_attach()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.load_executable();

    fx.process.write_u64(DYNAMIC + 24, 0xdead_0000);
    let err = fx.attach().unwrap_err();
    assert!(matches!(err, SymscopeError::MemoryRead { address: 0xdead_0000, .. }));
    assert_eq!(fx.session.tracker().state(), TrackerState::Uninitialized);
    assert!(fx.session.tracker().rendezvous_address().is_none());

    fx.process.write_u64(DYNAMIC + 24, R_DEBUG);
    let summary = fx.attach().unwrap();
    assert_eq!(summary.loaded.len(), 1);
    assert_eq!(fx.session.tracker().state(), TrackerState::Tracking);
}

#[test]
fn test_library_loaded_before_attach_is_not_reported_again()
{
    let mut fx = Fixture::new();
    fx.append_node("/lib/liba.so", 0x7f10_0000_0000);
    fx.append_node("/lib/libb.so", 0x7f20_0000_0000);
    fx.load_executable();
    let direct = fx
        .session
        .load_image(&ImageDescriptor::new("/lib/liba.so", 0x7f10_0000_0000), &fx.images);
    assert!(direct.newly_loaded);
    fx.drain_events();

    let summary = fx.attach().unwrap();
    assert_eq!(summary.loaded.len(), 1);
    assert_eq!(summary.already_known, 1);
    assert_eq!(fx.session.store().module(summary.loaded[0]).unwrap().path(), std::path::Path::new("/lib/libb.so"));

    let announced: Vec<_> = fx
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            TrackerEvent::ModuleLoaded { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(announced, [std::path::PathBuf::from("/lib/libb.so")]);
}
