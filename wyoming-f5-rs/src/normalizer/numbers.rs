//! Russian cardinal numerals and noun plural agreement.
//!
//! Covers the whole `u128` range (up to undecillions). Values that do not fit
//! are reported as parse errors so the caller can keep the original digits.

use std::num::ParseIntError;

const UNITS: [&str; 10] = [
    "ноль", "один", "два", "три", "четыре", "пять", "шесть", "семь", "восемь", "девять",
];

const TEENS: [&str; 10] = [
    "десять",
    "одиннадцать",
    "двенадцать",
    "тринадцать",
    "четырнадцать",
    "пятнадцать",
    "шестнадцать",
    "семнадцать",
    "восемнадцать",
    "девятнадцать",
];

const TENS: [&str; 10] = [
    "", "", "двадцать", "тридцать", "сорок", "пятьдесят", "шестьдесят", "семьдесят",
    "восемьдесят", "девяносто",
];

const HUNDREDS: [&str; 10] = [
    "", "сто", "двести", "триста", "четыреста", "пятьсот", "шестьсот", "семьсот",
    "восемьсот", "девятьсот",
];

/// Scale nouns by group index (1 = thousands), each as (one, few, many).
const SCALES: [[&str; 3]; 12] = [
    ["тысяча", "тысячи", "тысяч"],
    ["миллион", "миллиона", "миллионов"],
    ["миллиард", "миллиарда", "миллиардов"],
    ["триллион", "триллиона", "триллионов"],
    ["квадриллион", "квадриллиона", "квадриллионов"],
    ["квинтиллион", "квинтиллиона", "квинтиллионов"],
    ["секстиллион", "секстиллиона", "секстиллионов"],
    ["септиллион", "септиллиона", "септиллионов"],
    ["октиллион", "октиллиона", "октиллионов"],
    ["нониллион", "нониллиона", "нониллионов"],
    ["дециллион", "дециллиона", "дециллионов"],
    ["ундециллион", "ундециллиона", "ундециллионов"],
];

const PERCENT_FORMS: [&str; 3] = ["процент", "процента", "процентов"];
const HUNDREDTHS_FORMS: [&str; 3] = ["сотая", "сотых", "сотых"];
const THOUSANDTHS_FORMS: [&str; 3] = ["тысячная", "тысячных", "тысячных"];

/// Plural category of a Russian noun following a cardinal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluralForm {
    /// 1, 21, 101 ... but not 11
    One,
    /// 2-4, 22-24 ... but not 12-14
    Few,
    /// everything else
    Many,
}

impl PluralForm {
    pub fn of(n: u128) -> Self {
        if (11..=19).contains(&(n % 100)) {
            return Self::Many;
        }
        match n % 10 {
            1 => Self::One,
            2..=4 => Self::Few,
            _ => Self::Many,
        }
    }

    fn pick(self, forms: &[&'static str; 3]) -> &'static str {
        match self {
            Self::One => forms[0],
            Self::Few => forms[1],
            Self::Many => forms[2],
        }
    }
}

/// Word for "percent" agreeing with the number in front of it.
///
/// Fractional numbers always take the genitive singular ("процента").
pub fn percent_word(number: &str) -> &'static str {
    if number.contains(['.', ',']) {
        return PERCENT_FORMS[1];
    }
    match number.parse::<u128>() {
        Ok(n) => PluralForm::of(n).pick(&PERCENT_FORMS),
        Err(_) => PERCENT_FORMS[2],
    }
}

/// Spell out an unsigned integer in Russian (masculine agreement).
pub fn integer_to_words(n: u128) -> String {
    if n == 0 {
        return UNITS[0].to_string();
    }

    let mut groups = Vec::new();
    let mut rest = n;
    while rest > 0 {
        groups.push(rest % 1000);
        rest /= 1000;
    }

    let mut words: Vec<&str> = Vec::new();
    for (index, &group) in groups.iter().enumerate().rev() {
        if group == 0 {
            continue;
        }
        // thousands are feminine: "одна тысяча", "две тысячи"
        push_triplet(&mut words, group, index == 1);
        if index > 0 {
            words.push(PluralForm::of(group).pick(&SCALES[index - 1]));
        }
    }
    words.join(" ")
}

fn push_triplet(words: &mut Vec<&'static str>, n: u128, feminine: bool) {
    let hundreds = (n / 100) as usize;
    let tail = (n % 100) as usize;

    if hundreds > 0 {
        words.push(HUNDREDS[hundreds]);
    }
    if (10..20).contains(&tail) {
        words.push(TEENS[tail - 10]);
        return;
    }
    if tail >= 20 {
        words.push(TENS[tail / 10]);
    }
    match tail % 10 {
        0 => {}
        1 if feminine => words.push("одна"),
        2 if feminine => words.push("две"),
        unit => words.push(UNITS[unit]),
    }
}

/// Spell out a numeral that may carry a `.` or `,` decimal separator.
///
/// Fractions are read the conventional way: "3.5" is "три и пять",
/// "3.14" is "три и четырнадцать сотых", "1.001" is "один и одна тысячная".
/// Longer fractions fall back to "точка" followed by the digits as a number.
pub fn numeral_to_words(numeral: &str) -> Result<String, ParseIntError> {
    let numeral = numeral.replace(',', ".");
    let Some((integer_part, fractional_part)) = numeral.split_once('.') else {
        return Ok(integer_to_words(numeral.parse()?));
    };

    if integer_part.is_empty() || fractional_part.is_empty() {
        let digits: String = numeral.chars().filter(|c| *c != '.').collect();
        return Ok(integer_to_words(digits.parse()?));
    }

    let integer_words = integer_to_words(integer_part.parse()?);
    let fractional_value: u128 = fractional_part.parse()?;
    let mut fractional_words = integer_to_words(fractional_value);

    let fractional_len = fractional_part.chars().count();
    if fractional_len == 1 {
        return Ok(format!("{integer_words} и {fractional_words}"));
    }

    // Agree with the feminine "сотая"/"тысячная" that follows.
    if fractional_value % 10 == 1 && fractional_value % 100 != 11 {
        if let Some(stem) = fractional_words.strip_suffix("один") {
            fractional_words = format!("{stem}одна");
        }
    }
    if fractional_value % 10 == 2 && fractional_value % 100 != 12 {
        if let Some(stem) = fractional_words.strip_suffix("два") {
            fractional_words = format!("{stem}две");
        }
    }

    let form = PluralForm::of(fractional_value);
    Ok(match fractional_len {
        2 => format!(
            "{integer_words} и {fractional_words} {}",
            form.pick(&HUNDREDTHS_FORMS)
        ),
        3 => format!(
            "{integer_words} и {fractional_words} {}",
            form.pick(&THOUSANDTHS_FORMS)
        ),
        _ => format!("{integer_words} точка {fractional_words}"),
    })
}
