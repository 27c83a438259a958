mod common;

use common::{ElfBuilder, StabStream};
use gimli::RunTimeEndian;
use symscope_core::stabs::{StabReader, StabsBuilder, TypeNode, TypeStore, N_FUN, N_GSYM, N_LSYM, N_SLINE, N_SO};
use symscope_core::symbols::{
    DebugInfoStatus, ImageDescriptor, LineNumberEntry, ModuleKind, SymbolKind, SymbolStore,
};
use symscope_core::Session;

fn scenario_a() -> StabStream
{
    StabStream::new()
        .push(N_SO, 0, 0, "a.c")
        .push(N_FUN, 0, 0x1000, "main:F1")
        .push(N_SLINE, 10, 0, "")
        .push(N_SLINE, 11, 4, "")
}

#[test]
fn test_function_with_two_line_entries()
{
    let (stabs, strings) = scenario_a().finish();
    let mut types = TypeStore::new();
    let mut store = SymbolStore::new();
    let (module, _) = store.add_module("/bin/a".into(), 0, 0, ModuleKind::Executable);

    let mut builder = StabsBuilder::new(&mut types, &mut store, module, 0, 16);
    let entries = builder.run(&stabs, &strings, RunTimeEndian::Little).unwrap();
    assert!(builder.diagnostics().is_empty());
    assert_eq!(entries, 5);

    let functions: Vec<_> = store
        .symbols_in(module)
        .filter(|(_, symbol)| symbol.kind == SymbolKind::Function)
        .collect();
    assert_eq!(functions.len(), 1);

    let (_, main) = functions[0];
    assert_eq!(main.name.raw(), "main");
    assert_eq!(main.address.value(), 0x1000);
    let body = main.body.as_ref().unwrap();
    assert!(body.normalized);
    assert_eq!(
        body.lines,
        vec![
            LineNumberEntry { offset: 0, line: 10 },
            LineNumberEntry { offset: 4, line: 11 },
        ]
    );
}

#[test]
fn test_function_address_includes_load_bias()
{
    // The trailing empty-named function record closes `main` and gives its size.
    let image = ElfBuilder::new().stabs(&scenario_a().push(N_FUN, 0, 0x10, "")).build();
    let mut session = Session::default();
    let report = session.load_image_bytes(&ImageDescriptor::new("/lib/liba.so", 0x7f00_0000), &image);

    assert_eq!(report.status, DebugInfoStatus::Loaded);
    let ids = session.store().lookup("main");
    assert_eq!(ids.len(), 1);
    let main = session.store().symbol(ids[0]).unwrap();
    assert_eq!(main.address.value(), 0x7f00_1000);
    assert_eq!(main.size, Some(0x10));
    assert_eq!(session.store().module(report.module).unwrap().sources(), ["a.c".to_string()]);

    let (_, line) = session.store().line_at(main.address.checked_add(5).unwrap()).unwrap();
    assert_eq!(line.line, 11);
}

#[test]
fn test_three_record_continuation_reassembles()
{
    let stream = StabStream::new()
        .push(N_SO, 0, 0, "a.c")
        .push(N_LSYM, 0, 0, "int:t1=r1;-2147483648;2147483647;")
        .push(N_LSYM, 0, 0, "point:T5=s8x:1,0,32;\\")
        .push(N_LSYM, 0, 0, "y:1,32,32;\\")
        .push(N_LSYM, 0, 0, ";")
        .push(N_GSYM, 0, 0x2000, "origin:G5");
    let (stabs, strings) = stream.finish();

    let mut reader = StabReader::new(&stabs, &strings, RunTimeEndian::Little);
    let mut diagnostics = Vec::new();
    let texts: Vec<String> = std::iter::from_fn(|| reader.next_entry(&mut diagnostics))
        .map(|entry| entry.text)
        .collect();
    assert!(diagnostics.is_empty());
    assert_eq!(texts.len(), 5);
    assert_eq!(texts[3], "point:T5=s8x:1,0,32;y:1,32,32;;");

    let mut session = Session::default();
    session.load_image_bytes(&ImageDescriptor::new("/bin/p", 0), &ElfBuilder::new().stabs(&stream).build());
    let origin = session.store().symbol(session.store().lookup("origin")[0]).unwrap();
    match session.symbol_type(origin).unwrap() {
        TypeNode::StructOrUnion { size, members, .. } => {
            assert_eq!(*size, Some(8));
            let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, ["x", "y"]);
        }
        other => panic!("expected a struct, got {other:?}"),
    }
}

#[test]
fn test_locals_are_dropped_inside_included_source()
{
    use symscope_core::stabs::{N_PSYM, N_SOL};

    let stream = StabStream::new()
        .push(N_SO, 0, 0, "/src/")
        .push(N_SO, 0, 0, "main.c")
        .push(N_FUN, 0, 0x100, "f:F1")
        .push(N_PSYM, 0, 8, "argc:p1")
        .push(N_SOL, 0, 0, "inline.h")
        .push(N_SLINE, 3, 4, "")
        .push(N_LSYM, 0, (-4i32) as u32, "hidden:1")
        .push(N_SOL, 0, 0, "/src/main.c")
        .push(N_SLINE, 7, 8, "");
    let mut session = Session::default();
    let report = session.load_image_bytes(&ImageDescriptor::new("/bin/m", 0), &ElfBuilder::new().stabs(&stream).build());
    assert_eq!(session.store().module(report.module).unwrap().sources(), ["/src/main.c".to_string()]);

    let f = session.store().symbol(session.store().lookup("f")[0]).unwrap();
    let body = f.body.as_ref().unwrap();
    let locals: Vec<_> = body.locals.iter().map(|l| (l.name.as_str(), l.is_parameter)).collect();
    assert_eq!(locals, [("argc", true)]);
    assert_eq!(body.lines, vec![LineNumberEntry { offset: 8, line: 7 }]);
}
