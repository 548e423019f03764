//! `#[derive(Shadow)]` declarations.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use umbra::prelude::*;

static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);
static TOAST: ClassInfo = ClassInfo::extends("android.widget.Toast", &OBJECT);

#[derive(Default, Shadow)]
#[shadow(of = VIEW)]
struct ShadowView {
    width: i32,
}

#[derive(Default, Shadow)]
#[shadow(of = TOAST, name = "QuietToast", call_through = false, min_sdk = 21, max_sdk = 33)]
struct ToastState {
    shown: u32,
}

#[test]
fn derive_defaults() {
    assert_eq!(ShadowView::shadow_name(), "ShadowView");
    assert_eq!(ShadowView::real_class(), RealClass::of(&VIEW));
    assert_eq!(ShadowView::options(), ShadowOptions::default());
}

#[test]
fn derive_with_attributes() {
    assert_eq!(ToastState::shadow_name(), "QuietToast");
    let options = ToastState::options();
    assert!(!options.call_through_by_default);
    assert_eq!(options.min_sdk, Some(21));
    assert_eq!(options.max_sdk, Some(33));
}

#[test]
fn derived_builder_dispatches() {
    let shadow = ShadowView::shadow_builder()
        .method("getWidth", &[], |s, _| Ok(Value::Int(s.width)))
        .build()
        .unwrap();
    assert!(shadow.has_state::<ShadowView>());

    let env = ShadowEnvironment::builder().shadow(shadow).build().unwrap();
    let view = env.new_instance(RealClass::of(&VIEW)).unwrap();
    view.with_shadow(|s: &mut ShadowView| s.width = 12).unwrap();
    assert_eq!(view.call::<i32>(&Call::new("getWidth")).unwrap(), 12);
}

#[test]
fn derived_options_reach_the_environment() {
    let shadow = ShadowClass::of::<ToastState>()
        .method("show", &[], |s, _| {
            s.shown += 1;
            Ok(Value::Void)
        })
        .build()
        .unwrap();
    assert!(!shadow.call_through_by_default());

    let supported = ShadowEnvironment::builder()
        .config(SandboxConfig::default().with_api_level(30))
        .shadow(shadow.clone())
        .build()
        .unwrap();
    let toast = supported.new_instance(RealClass::of(&TOAST)).unwrap();
    toast.invoke(&Call::new("show")).unwrap();
    assert_eq!(
        toast.invoke(&Call::new("getDuration").returning(ParamType::INT)).unwrap(),
        Value::Int(0)
    );
    assert_eq!(toast.with_shadow(|s: &mut ToastState| s.shown).unwrap(), 1);

    let too_new = ShadowEnvironment::builder()
        .config(SandboxConfig::default().with_api_level(34))
        .shadow(shadow)
        .build()
        .unwrap();
    let toast = too_new.new_instance(RealClass::of(&TOAST)).unwrap();
    assert!(toast.shadow_class().is_none());
}
