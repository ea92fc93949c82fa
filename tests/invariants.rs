//! Contract Invariant Tests
//!
//! End-to-end guarantees of the generate/load/interpret pipeline.

use std::collections::HashMap;

use imgscript_core::{
    catalog::{
        ApiManifest, ConstructorDescriptor, MethodDescriptor, ParameterDescriptor,
        PropertyDescriptor, TypeCatalog, TypeDescriptor, TypeRef,
    },
    coerce::{CoercionError, ParserSet, Value},
    document::{parse_document, DocumentElement},
    generate::{BuildError, BuilderRegistry, Generator},
    interpret::{Interpreter, InterpreterState, RunReport, ScriptError, TargetObject},
    resolve::{ResolutionError, TieBreak},
};

fn param(name: &str, ty: &str) -> ParameterDescriptor {
    ParameterDescriptor {
        name: name.to_string(),
        ty: TypeRef::try_from(ty.to_string()).unwrap(),
        optional: false,
    }
}

fn method(name: &str, parameters: Vec<ParameterDescriptor>) -> MethodDescriptor {
    MethodDescriptor { name: name.to_string(), parameters }
}

fn demo_manifest() -> ApiManifest {
    ApiManifest {
        api_version: "1.0".to_string(),
        target: "Image".to_string(),
        types: vec![
            TypeDescriptor {
                name: "Image".to_string(),
                constructors: vec![],
                properties: vec![PropertyDescriptor {
                    name: "quality".to_string(),
                    ty: TypeRef::scalar("int"),
                }],
                methods: vec![
                    method("Resize", vec![param("width", "int"), param("height", "int")]),
                    method("Resize", vec![param("geometry", "string")]),
                    method("Blur", vec![param("radius", "int")]),
                    method("Blur", vec![param("radius", "float")]),
                    method("Rotate", vec![param("degrees", "float")]),
                    method("Annotate", vec![param("text", "string"), param("gravity", "Gravity")]),
                    method("Composite", vec![param("origin", "Coordinate")]),
                    method("Draw", vec![param("paths", "[Path]")]),
                    method("Measure", vec![]),
                ],
                is_enum: false,
                members: vec![],
            },
            TypeDescriptor {
                name: "Coordinate".to_string(),
                constructors: vec![ConstructorDescriptor {
                    parameters: vec![param("x", "float"), param("y", "float")],
                }],
                properties: vec![],
                methods: vec![],
                is_enum: false,
                members: vec![],
            },
            TypeDescriptor {
                name: "Path".to_string(),
                constructors: vec![ConstructorDescriptor {
                    parameters: vec![param("coordinates", "[Coordinate]")],
                }],
                properties: vec![],
                methods: vec![],
                is_enum: false,
                members: vec![],
            },
            TypeDescriptor {
                name: "Gravity".to_string(),
                constructors: vec![],
                properties: vec![],
                methods: vec![],
                is_enum: true,
                members: vec![
                    "North".to_string(),
                    "South".to_string(),
                    "East".to_string(),
                    "West".to_string(),
                ],
            },
        ],
    }
}

#[derive(Default)]
struct RecordingTarget {
    calls: Vec<(String, Vec<Value>)>,
    sets: Vec<(String, Value)>,
}

impl TargetObject for RecordingTarget {
    fn apply(&mut self, operation: &str, arguments: &[Value]) -> Result<Option<Value>, String> {
        self.calls.push((operation.to_string(), arguments.to_vec()));
        if operation == "Measure" {
            return Ok(Some(Value::integer(90)));
        }
        Ok(None)
    }

    fn set(&mut self, property: &str, value: Value) -> Result<(), String> {
        self.sets.push((property.to_string(), value));
        Ok(())
    }
}

/// Generate, load, parse, and run in one step.
fn run_script(xml: &str) -> (Result<RunReport, ScriptError>, RecordingTarget, InterpreterState) {
    run_script_with(xml, TieBreak::FirstDeclared)
}

fn run_script_with(
    xml: &str,
    tie_break: TieBreak,
) -> (Result<RunReport, ScriptError>, RecordingTarget, InterpreterState) {
    let catalog = TypeCatalog::from_manifest(demo_manifest()).unwrap();
    let parsers = ParserSet::new();
    let (plan, failures) = Generator::new(&catalog, &parsers).generate();
    assert!(failures.is_empty(), "demo manifest should generate cleanly");
    let registry = BuilderRegistry::load(&plan, &catalog, &parsers, tie_break).unwrap();

    let document = parse_document(xml).unwrap();
    let mut target = RecordingTarget::default();
    let mut interpreter = Interpreter::new(&registry);
    let outcome = interpreter.run(&document, &mut target);
    let state = interpreter.state();
    (outcome, target, state)
}

#[test]
fn invariant_builder_round_trips_direct_construction() {
    let catalog = TypeCatalog::from_manifest(demo_manifest()).unwrap();
    let parsers = ParserSet::new();
    let (plan, _) = Generator::new(&catalog, &parsers).generate();
    let registry =
        BuilderRegistry::load(&plan, &catalog, &parsers, TieBreak::FirstDeclared).unwrap();

    let element = DocumentElement::new("Coordinate")
        .with_attribute("x", "1.5")
        .with_attribute("y", "2.5");
    let built = registry
        .build_instance("Coordinate", &element, &HashMap::new())
        .unwrap();

    // Observably equal to calling the constructor directly with the
    // coerced values.
    let direct = Value::Instance {
        type_name: "Coordinate".to_string(),
        arguments: vec![Value::float(1.5), Value::float(2.5)],
    };
    assert_eq!(built, direct);
}

#[test]
fn invariant_empty_collection_is_empty_sequence_not_failure() {
    let catalog = TypeCatalog::from_manifest(demo_manifest()).unwrap();
    let parsers = ParserSet::new();
    let (plan, _) = Generator::new(&catalog, &parsers).generate();
    let registry =
        BuilderRegistry::load(&plan, &catalog, &parsers, TieBreak::FirstDeclared).unwrap();

    let element = DocumentElement::new("coordinates");
    let built = registry.build_collection(&element, &HashMap::new()).unwrap();
    assert_eq!(built, Value::Sequence { items: vec![] });
}

#[test]
fn invariant_collection_preserves_document_order() {
    let catalog = TypeCatalog::from_manifest(demo_manifest()).unwrap();
    let parsers = ParserSet::new();
    let (plan, _) = Generator::new(&catalog, &parsers).generate();
    let registry =
        BuilderRegistry::load(&plan, &catalog, &parsers, TieBreak::FirstDeclared).unwrap();

    let mut container = DocumentElement::new("coordinates");
    for x in ["1.0", "2.0", "3.0"] {
        container.children.push(
            DocumentElement::new("Coordinate")
                .with_attribute("x", x)
                .with_attribute("y", "0"),
        );
    }

    let built = registry.build_collection(&container, &HashMap::new()).unwrap();
    let Value::Sequence { items } = built else { panic!("expected sequence") };
    let xs: Vec<&Value> = items
        .iter()
        .map(|i| match i {
            Value::Instance { arguments, .. } => &arguments[0],
            other => panic!("expected instance, got {other:?}"),
        })
        .collect();
    assert_eq!(xs, vec![&Value::float(1.0), &Value::float(2.0), &Value::float(3.0)]);
}

#[test]
fn invariant_first_declared_overload_wins_repeatedly() {
    for _ in 0..3 {
        let (outcome, target, _) = run_script(r#"<script><Blur radius="2"/></script>"#);
        outcome.unwrap();
        assert_eq!(target.calls.len(), 1);
        // Blur(int) is declared before Blur(float).
        assert_eq!(target.calls[0].1, vec![Value::integer(2)]);
    }
}

#[test]
fn invariant_strict_mode_fails_on_ambiguous_overloads() {
    let (outcome, target, state) =
        run_script_with(r#"<script><Blur radius="2"/></script>"#, TieBreak::Strict);
    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Build(BuildError::Resolution(ResolutionError::Ambiguous { .. }))
    ));
    assert_eq!(state, InterpreterState::Failed);
    assert!(target.calls.is_empty());
}

#[test]
fn invariant_parse_failure_names_the_offending_text() {
    let (outcome, target, state) =
        run_script(r#"<script><Resize width="64" height="notanumber"/></script>"#);
    let err = outcome.unwrap_err();
    match err {
        ScriptError::Build(BuildError::Coercion(CoercionError::Parse { text, .. })) => {
            assert_eq!(text, "notanumber");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(state, InterpreterState::Failed);
    assert!(target.calls.is_empty());
}

#[test]
fn invariant_unknown_enum_member_lists_valid_members() {
    let (outcome, _, state) =
        run_script(r#"<script><Annotate text="hi" gravity="Center"/></script>"#);
    let err = outcome.unwrap_err();
    match err {
        ScriptError::Build(BuildError::Coercion(CoercionError::UnknownEnumMember {
            member,
            valid,
            ..
        })) => {
            assert_eq!(member, "Center");
            assert_eq!(valid, vec!["North", "South", "East", "West"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(state, InterpreterState::Failed);
}

#[test]
fn invariant_resize_end_to_end() {
    let (outcome, target, state) =
        run_script(r#"<script><Resize width="64" height="64"/></script>"#);
    let report = outcome.unwrap();

    assert_eq!(state, InterpreterState::Completed);
    assert_eq!(report.operations_applied, 1);
    assert_eq!(
        target.calls,
        vec![("Resize".to_string(), vec![Value::integer(64), Value::integer(64)])]
    );
}

#[test]
fn invariant_resize_without_height_is_no_match_and_nothing_runs() {
    let (outcome, target, state) = run_script(r#"<script><Resize width="64"/></script>"#);
    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Build(BuildError::Resolution(ResolutionError::NoMatch { .. }))
    ));
    assert_eq!(state, InterpreterState::Failed);
    assert!(target.calls.is_empty());
}

#[test]
fn invariant_unknown_element_fails_before_any_operation() {
    let (outcome, target, state) = run_script(
        r#"<script><Resize width="64" height="64"/><Sharpen/></script>"#,
    );
    let err = outcome.unwrap_err();
    assert!(matches!(err, ScriptError::UnknownElement { element } if element == "Sharpen"));
    assert_eq!(state, InterpreterState::Failed);
    // The Resize before the unknown element must not have run.
    assert!(target.calls.is_empty());
}

#[test]
fn invariant_nested_object_argument() {
    let (outcome, target, _) = run_script(
        r#"<script><Composite><origin x="3" y="4"/></Composite></script>"#,
    );
    outcome.unwrap();
    assert_eq!(
        target.calls,
        vec![(
            "Composite".to_string(),
            vec![Value::Instance {
                type_name: "Coordinate".to_string(),
                arguments: vec![Value::float(3.0), Value::float(4.0)],
            }]
        )]
    );
}

#[test]
fn invariant_trailing_collection_absorbs_unnamed_children() {
    let (outcome, target, _) = run_script(
        r#"<script>
             <Draw>
               <Path>
                 <coordinates>
                   <Coordinate x="0" y="0"/>
                   <Coordinate x="1" y="1"/>
                 </coordinates>
               </Path>
             </Draw>
           </script>"#,
    );
    outcome.unwrap();

    let (operation, arguments) = &target.calls[0];
    assert_eq!(operation, "Draw");
    let Value::Sequence { items } = &arguments[0] else { panic!("expected sequence") };
    assert_eq!(items.len(), 1);
    let Value::Instance { type_name, arguments } = &items[0] else { panic!("expected path") };
    assert_eq!(type_name, "Path");
    let Value::Sequence { items } = &arguments[0] else { panic!("expected coordinates") };
    assert_eq!(items.len(), 2);
}

#[test]
fn invariant_property_set_element() {
    let (outcome, target, _) = run_script(r#"<script><quality value="80"/></script>"#);
    outcome.unwrap();
    assert_eq!(target.sets, vec![("quality".to_string(), Value::integer(80))]);
}

#[test]
fn invariant_bound_result_substitutes_into_later_arguments() {
    let (outcome, target, _) = run_script(
        r#"<script>
             <Measure variable="angle"/>
             <Rotate degrees="{angle}"/>
           </script>"#,
    );
    let report = outcome.unwrap();
    assert_eq!(report.operations_applied, 2);
    assert_eq!(report.variables_bound, 1);
    // The integer binding flows into the float slot unchanged.
    assert_eq!(target.calls[1], ("Rotate".to_string(), vec![Value::integer(90)]));
}

#[test]
fn invariant_unbound_variable_is_a_document_error() {
    let (outcome, target, state) =
        run_script(r#"<script><Rotate degrees="{missing}"/></script>"#);
    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Build(BuildError::Coercion(CoercionError::UnboundVariable { ref name, .. }))
            if name == "missing"
    ));
    assert_eq!(state, InterpreterState::Failed);
    assert!(target.calls.is_empty());
}

#[test]
fn invariant_bound_instance_flows_into_call_argument() {
    let (outcome, target, state) = run_script(
        r#"<script>
             <Coordinate variable="origin" x="1" y="2"/>
             <Composite origin="{origin}"/>
           </script>"#,
    );
    let report = outcome.unwrap();
    assert_eq!(state, InterpreterState::Completed);
    assert_eq!(report.operations_applied, 1);
    assert_eq!(
        target.calls,
        vec![(
            "Composite".to_string(),
            vec![Value::Instance {
                type_name: "Coordinate".to_string(),
                arguments: vec![Value::float(1.0), Value::float(2.0)],
            }]
        )]
    );
}

#[test]
fn invariant_instance_reference_of_wrong_kind_is_rejected() {
    // `angle` holds an integer, not a Coordinate.
    let (outcome, target, state) = run_script(
        r#"<script>
             <Measure variable="angle"/>
             <Composite origin="{angle}"/>
           </script>"#,
    );
    let err = outcome.unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Build(BuildError::Coercion(CoercionError::VariableKindMismatch {
            ref name,
            ..
        })) if name == "angle"
    ));
    assert_eq!(state, InterpreterState::Failed);
    // Only the Measure before the failure ran.
    assert_eq!(target.calls.len(), 1);
}

#[test]
fn invariant_empty_trailing_collection_invokes_with_empty_sequence() {
    let (outcome, target, state) = run_script(r#"<script><Draw/></script>"#);
    let report = outcome.unwrap();
    assert_eq!(state, InterpreterState::Completed);
    assert_eq!(report.operations_applied, 1);
    assert_eq!(
        target.calls,
        vec![("Draw".to_string(), vec![Value::Sequence { items: vec![] }])]
    );
}

#[test]
fn invariant_caller_seeded_variables_are_visible() {
    let catalog = TypeCatalog::from_manifest(demo_manifest()).unwrap();
    let parsers = ParserSet::new();
    let (plan, _) = Generator::new(&catalog, &parsers).generate();
    let registry =
        BuilderRegistry::load(&plan, &catalog, &parsers, TieBreak::FirstDeclared).unwrap();

    let document = parse_document(r#"<script><Rotate degrees="{angle}"/></script>"#).unwrap();
    let mut target = RecordingTarget::default();
    let mut interpreter = Interpreter::new(&registry);
    let mut seeded = HashMap::new();
    seeded.insert("angle".to_string(), Value::float(45.0));
    interpreter
        .run_with_variables(&document, &mut target, seeded)
        .unwrap();
    assert_eq!(target.calls, vec![("Rotate".to_string(), vec![Value::float(45.0)])]);
}

#[test]
fn invariant_construction_element_binds_without_applying() {
    let (outcome, target, _) = run_script(
        r#"<script><Coordinate variable="origin" x="1" y="2"/></script>"#,
    );
    let report = outcome.unwrap();
    assert_eq!(report.operations_applied, 0);
    assert_eq!(report.variables_bound, 1);
    assert!(target.calls.is_empty());
}

#[test]
fn invariant_plan_round_trips_through_disk() {
    let catalog = TypeCatalog::from_manifest(demo_manifest()).unwrap();
    let parsers = ParserSet::new();
    let (plan, _) = Generator::new(&catalog, &parsers).generate();

    let dir = tempfile::tempdir().unwrap();
    let plan_path = dir.path().join("plan.json");
    std::fs::write(&plan_path, serde_json::to_string_pretty(&plan).unwrap()).unwrap();

    let restored: imgscript_core::generate::RegistryPlan =
        serde_json::from_str(&std::fs::read_to_string(&plan_path).unwrap()).unwrap();
    let registry =
        BuilderRegistry::load(&restored, &catalog, &parsers, TieBreak::FirstDeclared).unwrap();

    let document = parse_document(r#"<script><Resize width="8" height="8"/></script>"#).unwrap();
    let mut target = RecordingTarget::default();
    let mut interpreter = Interpreter::new(&registry);
    interpreter.run(&document, &mut target).unwrap();
    assert_eq!(target.calls.len(), 1);
}

#[test]
fn invariant_manifest_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(
        &manifest_path,
        serde_json::to_string_pretty(&demo_manifest()).unwrap(),
    )
    .unwrap();

    let catalog = TypeCatalog::load_from_file(&manifest_path).unwrap();
    assert_eq!(catalog.target_name(), "Image");
    assert!(catalog.describe("Gravity").unwrap().is_enum);
}
