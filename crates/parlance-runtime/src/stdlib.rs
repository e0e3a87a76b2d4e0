//! Opérateurs et fonctions installés par `Library::with_defaults()`.

use parlance_core::{Arity, ValueType};
use rand::Rng;

use crate::{operator_function, Error, Library, RResult, SharedRng, Value};

pub(crate) fn install(lib: &mut Library, rng: &SharedRng) {
    install_operators(lib);
    install_functions(lib);
    install_random(lib, rng);
    lib.define_intrinsic("visited", Arity::Fixed(1), ValueType::Bool);
    lib.define_intrinsic("visited_count", Arity::Fixed(1), ValueType::Number);
}

/* ─────────────────────────── Opérateurs ─────────────────────────── */

fn install_operators(lib: &mut Library) {
    use ValueType as T;

    // égalité : définie entre tous les types
    for ty in [T::Number, T::String, T::Bool] {
        lib.define_fn(&operator_function(ty, "EqualTo"), Arity::Fixed(2), T::Bool, |a| {
            Ok(Value::Bool(a[0].loose_eq(&a[1])))
        });
        lib.define_fn(&operator_function(ty, "NotEqualTo"), Arity::Fixed(2), T::Bool, |a| {
            Ok(Value::Bool(!a[0].loose_eq(&a[1])))
        });
    }

    let arith: [(&str, fn(f64, f64) -> RResult<f64>); 5] = [
        ("Add", |x, y| Ok(x + y)),
        ("Minus", |x, y| Ok(x - y)),
        ("Multiply", |x, y| Ok(x * y)),
        ("Divide", |x, y| if y == 0.0 { Err(Error::DivisionByZero) } else { Ok(x / y) }),
        ("Modulo", |x, y| if y == 0.0 { Err(Error::DivisionByZero) } else { Ok(x % y) }),
    ];
    for (suffix, f) in arith {
        lib.define_fn(&operator_function(T::Number, suffix), Arity::Fixed(2), T::Number, move |a| {
            Ok(Value::Number(f(a[0].as_number()?, a[1].as_number()?)?))
        });
    }

    let compare: [(&str, fn(f64, f64) -> bool); 4] = [
        ("GreaterThan", |x, y| x > y),
        ("GreaterThanOrEqualTo", |x, y| x >= y),
        ("LessThan", |x, y| x < y),
        ("LessThanOrEqualTo", |x, y| x <= y),
    ];
    for (suffix, f) in compare {
        lib.define_fn(&operator_function(T::Number, suffix), Arity::Fixed(2), T::Bool, move |a| {
            Ok(Value::Bool(f(a[0].as_number()?, a[1].as_number()?)))
        });
    }

    lib.define_fn(&operator_function(T::Number, "UnaryMinus"), Arity::Fixed(1), T::Number, |a| {
        Ok(Value::Number(-a[0].as_number()?))
    });

    lib.define_fn(&operator_function(T::String, "Add"), Arity::Fixed(2), T::String, |a| {
        Ok(Value::Str(format!("{}{}", a[0].as_str()?, a[1].as_str()?)))
    });

    let logic: [(&str, fn(bool, bool) -> bool); 3] = [
        ("And", |x, y| x && y),
        ("Or", |x, y| x || y),
        ("Xor", |x, y| x ^ y),
    ];
    for (suffix, f) in logic {
        lib.define_fn(&operator_function(T::Bool, suffix), Arity::Fixed(2), T::Bool, move |a| {
            Ok(Value::Bool(f(a[0].as_bool()?, a[1].as_bool()?)))
        });
    }
    lib.define_fn(&operator_function(T::Bool, "Not"), Arity::Fixed(1), T::Bool, |a| Ok(Value::Bool(!a[0].as_bool()?)));
}

/* ─────────────────────────── Fonctions ─────────────────────────── */

fn install_functions(lib: &mut Library) {
    use ValueType as T;

    let unary: [(&str, fn(f64) -> f64); 8] = [
        ("round", f64::round_ties_even),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("inc", |v| if v.fract() == 0.0 { v + 1.0 } else { v.ceil() }),
        ("dec", |v| if v.fract() == 0.0 { v - 1.0 } else { v.floor() }),
        ("decimal", f64::fract),
        ("int", f64::trunc),
        ("abs", f64::abs),
    ];
    for (name, f) in unary {
        lib.define_fn(name, Arity::Fixed(1), T::Number, move |a| Ok(Value::Number(f(a[0].as_number()?))));
    }

    lib.define_fn("min", Arity::Fixed(2), T::Number, |a| Ok(Value::Number(a[0].as_number()?.min(a[1].as_number()?))));
    lib.define_fn("max", Arity::Fixed(2), T::Number, |a| Ok(Value::Number(a[0].as_number()?.max(a[1].as_number()?))));
    lib.define_fn("round_places", Arity::Fixed(2), T::Number, |a| {
        let places = a[1].as_number()?.trunc().clamp(0.0, 15.0);
        let scale = 10f64.powf(places);
        Ok(Value::Number((a[0].as_number()? * scale).round_ties_even() / scale))
    });

    lib.define_fn("string", Arity::Fixed(1), T::String, |a| Ok(Value::Str(a[0].to_string())));
    lib.define_fn("format_invariant", Arity::Fixed(1), T::String, |a| Ok(Value::Str(format!("{}", a[0].as_number()?))));
    lib.define_fn("number", Arity::Fixed(1), T::Number, |a| to_number(&a[0]).map(Value::Number));
    lib.define_fn("bool", Arity::Fixed(1), T::Bool, |a| to_bool(&a[0]).map(Value::Bool));
    lib.define_fn("format", Arity::Variadic, T::String, format_values);
}

/* ─────────────────────────── Aléatoire ─────────────────────────── */

/// Entier (troncature) d’un argument numérique fini.
#[allow(clippy::cast_possible_truncation)]
fn integer(name: &str, v: &Value) -> RResult<i64> {
    let n = v.as_number()?;
    if !n.is_finite() {
        return Err(Error::Msg(format!("{name}: {n} is not a finite number")));
    }
    Ok(n.trunc() as i64)
}

#[allow(clippy::cast_precision_loss)]
fn install_random(lib: &mut Library, rng: &SharedRng) {
    use ValueType as T;

    // [0, 1)
    let r = rng.clone();
    lib.define_fn("random", Arity::Fixed(0), T::Number, move |_| Ok(Value::Number(r.with(|g| g.gen::<f64>()))));

    // entier dans [min, max], bornes incluses
    let r = rng.clone();
    lib.define_fn("random_range", Arity::Fixed(2), T::Number, move |a| {
        let (min, max) = (integer("random_range", &a[0])?, integer("random_range", &a[1])?);
        if max < min {
            return Err(Error::Msg(format!("random_range: {max} is below {min}")));
        }
        Ok(Value::Number(r.with(|g| g.gen_range(min..=max)) as f64))
    });

    // réel dans [min, max]
    let r = rng.clone();
    lib.define_fn("random_range_float", Arity::Fixed(2), T::Number, move |a| {
        let (min, max) = (a[0].as_number()?, a[1].as_number()?);
        if !(min.is_finite() && max.is_finite()) || max < min {
            return Err(Error::Msg(format!("random_range_float: invalid range [{min}, {max}]")));
        }
        Ok(Value::Number(r.with(|g| g.gen_range(min..=max))))
    });

    // dé à `sides` faces : [1, sides]
    let r = rng.clone();
    lib.define_fn("dice", Arity::Fixed(1), T::Number, move |a| {
        let sides = integer("dice", &a[0])?;
        if sides < 1 {
            return Err(Error::Msg(format!("dice: a die needs at least one side, got {sides}")));
        }
        Ok(Value::Number(r.with(|g| g.gen_range(1..=sides)) as f64))
    });
}

fn to_number(v: &Value) -> RResult<f64> {
    match v {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Str(s) => s.trim().parse::<f64>().map_err(|_| Error::type_mismatch("Number", v)),
        other => Err(Error::type_mismatch("Number", other)),
    }
}

fn to_bool(v: &Value) -> RResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(Error::type_mismatch("Bool", v)),
        },
        other => Err(Error::type_mismatch("Bool", other)),
    }
}

/// `format("{0} has {1} coins", $name, $gold)`
fn format_values(args: &[Value]) -> RResult<Value> {
    let Some((template, rest)) = args.split_first() else {
        return Err(Error::Msg("format expects a template string".into()));
    };
    let template = template.as_str()?;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '{' {
            if let Some(close) = template[i..].find('}') {
                if let Ok(index) = template[i + 1..i + close].parse::<usize>() {
                    let value = rest.get(index).ok_or_else(|| Error::Msg(format!("format: no argument {index}")))?;
                    out.push_str(&value.to_string());
                    while chars.peek().is_some_and(|(j, _)| *j <= i + close) {
                        chars.next();
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }
    Ok(Value::Str(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Value]) -> RResult<Value> { Library::with_defaults().call(name, args) }

    #[test]
    fn arithmetic_operators() {
        assert_eq!(call("Number.Add", &[1.into(), 2.into()]), Ok(Value::Number(3.0)));
        assert_eq!(call("Number.Minus", &[1.into(), 2.into()]), Ok(Value::Number(-1.0)));
        assert_eq!(call("Number.Modulo", &[7.into(), 4.into()]), Ok(Value::Number(3.0)));
        assert_eq!(call("Number.UnaryMinus", &[4.into()]), Ok(Value::Number(-4.0)));
        assert_eq!(call("Number.Divide", &[1.into(), 0.into()]), Err(Error::DivisionByZero));
    }

    #[test]
    fn operators_reject_mismatched_types() {
        let err = call("Number.Add", &[1.into(), "x".into()]).unwrap_err();
        assert!(matches!(err, Error::Type { expected: "Number", .. }));
        assert!(call("Bool.And", &[true.into(), 1.into()]).is_err());
        assert!(call("String.Add", &["a".into(), 1.into()]).is_err());
        assert_eq!(call("String.Add", &["a".into(), "b".into()]), Ok(Value::from("ab")));
    }

    #[test]
    fn equality_is_total() {
        assert_eq!(call("Number.EqualTo", &[1.into(), "1".into()]), Ok(Value::Bool(false)));
        assert_eq!(call("String.NotEqualTo", &["a".into(), "b".into()]), Ok(Value::Bool(true)));
        assert_eq!(call("Bool.EqualTo", &[Value::Null, Value::Null]), Ok(Value::Bool(true)));
    }

    #[test]
    fn logic_and_comparisons() {
        assert_eq!(call("Bool.Xor", &[true.into(), true.into()]), Ok(Value::Bool(false)));
        assert_eq!(call("Bool.Not", &[false.into()]), Ok(Value::Bool(true)));
        assert_eq!(call("Number.GreaterThanOrEqualTo", &[2.into(), 2.into()]), Ok(Value::Bool(true)));
        assert_eq!(call("Number.LessThan", &[3.into(), 2.into()]), Ok(Value::Bool(false)));
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(call("inc", &[Value::Number(2.0)]), Ok(Value::Number(3.0)));
        assert_eq!(call("inc", &[Value::Number(2.3)]), Ok(Value::Number(3.0)));
        assert_eq!(call("dec", &[Value::Number(2.0)]), Ok(Value::Number(1.0)));
        assert_eq!(call("dec", &[Value::Number(2.7)]), Ok(Value::Number(2.0)));
        assert_eq!(call("round", &[Value::Number(2.5)]), Ok(Value::Number(2.0)));
        assert_eq!(call("round_places", &[Value::Number(1.2345), 2.into()]), Ok(Value::Number(1.23)));
        assert_eq!(call("int", &[Value::Number(-2.7)]), Ok(Value::Number(-2.0)));
        assert_eq!(call("max", &[1.into(), 5.into()]), Ok(Value::Number(5.0)));
    }

    #[test]
    fn conversions() {
        assert_eq!(call("number", &["12.5".into()]), Ok(Value::Number(12.5)));
        assert_eq!(call("number", &[true.into()]), Ok(Value::Number(1.0)));
        assert_eq!(call("bool", &["TRUE".into()]), Ok(Value::Bool(true)));
        assert_eq!(call("string", &[Value::Number(4.0)]), Ok(Value::from("4")));
        assert!(call("number", &["twelve".into()]).is_err());
    }

    #[test]
    fn random_functions_stay_in_range() {
        let lib = Library::with_seed(2024);
        for _ in 0..200 {
            let x = lib.call("random", &[]).unwrap().as_number().unwrap();
            assert!((0.0..1.0).contains(&x), "random() = {x}");

            let n = lib.call("random_range", &[3.into(), 6.into()]).unwrap().as_number().unwrap();
            assert!((3.0..=6.0).contains(&n) && n.fract() == 0.0, "random_range(3, 6) = {n}");

            let f = lib.call("random_range_float", &[Value::Number(-1.5), Value::Number(2.5)]).unwrap().as_number().unwrap();
            assert!((-1.5..=2.5).contains(&f), "random_range_float(-1.5, 2.5) = {f}");

            let d = lib.call("dice", &[6.into()]).unwrap().as_number().unwrap();
            assert!((1.0..=6.0).contains(&d) && d.fract() == 0.0, "dice(6) = {d}");
        }
        assert_eq!(lib.call("random_range", &[4.into(), 4.into()]), Ok(Value::Number(4.0)));
        assert_eq!(lib.call("dice", &[1.into()]), Ok(Value::Number(1.0)));
    }

    #[test]
    fn random_functions_cover_their_range() {
        let lib = Library::with_seed(9);
        let mut faces = [false; 6];
        for _ in 0..300 {
            let d = lib.call("dice", &[6.into()]).unwrap().as_number().unwrap();
            faces[d as usize - 1] = true;
        }
        assert_eq!(faces, [true; 6]);
    }

    #[test]
    fn random_functions_reject_bad_ranges() {
        let lib = Library::with_seed(1);
        assert!(lib.call("random_range", &[5.into(), 2.into()]).is_err());
        assert!(lib.call("random_range_float", &[Value::Number(1.0), Value::Number(f64::NAN)]).is_err());
        assert!(lib.call("dice", &[0.into()]).is_err());
        assert!(lib.call("dice", &["six".into()]).is_err());
    }

    #[test]
    fn seeded_libraries_repeat_their_draws() {
        let draws = |lib: &Library| {
            (0..10).map(|_| lib.call("random_range", &[1.into(), 100.into()]).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(draws(&Library::with_seed(5)), draws(&Library::with_seed(5)));
    }

    #[test]
    fn format_fills_placeholders() {
        let out = call("format", &["{0} has {1} coins, {x}".into(), "Ada".into(), 3.into()]);
        assert_eq!(out, Ok(Value::from("Ada has 3 coins, {x}")));
        assert!(call("format", &["{2}".into()]).is_err());
        assert!(call("format", &[]).is_err());
    }
}
