use nfce_core::document::{
    HolderDocument, HolderKind, HolderRole,
    holder::{classify, validate_holder},
};

#[test]
fn classification_follows_length() {
    assert_eq!(classify("529.982.247-25").kind, HolderKind::Cpf);
    assert_eq!(classify("11.222.333/0001-81").kind, HolderKind::Cnpj);
    assert_eq!(classify("123456789012").kind, HolderKind::Unknown);
    assert_eq!(classify("abc").kind, HolderKind::Unknown);
    assert!(!classify("").valid);
}

#[test]
fn formatting_is_ignored() {
    let formatted = validate_holder(" 11.222.333/0001-81 ", HolderRole::Emitter).unwrap();
    let bare = validate_holder("11222333000181", HolderRole::Emitter).unwrap();
    assert_eq!(formatted, bare);
    assert_eq!(bare, HolderDocument::Cnpj("11222333000181".into()));
}

#[test]
fn errors_name_role_and_kind() {
    let err = validate_holder("529.982.247-24", HolderRole::Recipient).unwrap_err();
    assert_eq!(err.role, HolderRole::Recipient);
    assert_eq!(err.kind, HolderKind::Cpf);
    assert_eq!(err.to_string(), "CPF of recipient is invalid");

    let err = validate_holder("11222333000100", HolderRole::Carrier).unwrap_err();
    assert_eq!(err.kind, HolderKind::Cnpj);
    assert_eq!(err.to_string(), "CNPJ of carrier is invalid");
}
