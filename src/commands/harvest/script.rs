use phf::phf_map;

/// Serbian Cyrillic to Gaj's Latin alphabet.
static CYRILLIC_TO_LATIN: phf::Map<char, &'static str> = phf_map! {
    'А' => "A", 'а' => "a",
    'Б' => "B", 'б' => "b",
    'В' => "V", 'в' => "v",
    'Г' => "G", 'г' => "g",
    'Д' => "D", 'д' => "d",
    'Ђ' => "Đ", 'ђ' => "đ",
    'Е' => "E", 'е' => "e",
    'Ж' => "Ž", 'ж' => "ž",
    'З' => "Z", 'з' => "z",
    'И' => "I", 'и' => "i",
    'Ј' => "J", 'ј' => "j",
    'К' => "K", 'к' => "k",
    'Л' => "L", 'л' => "l",
    'Љ' => "Lj", 'љ' => "lj",
    'М' => "M", 'м' => "m",
    'Н' => "N", 'н' => "n",
    'Њ' => "Nj", 'њ' => "nj",
    'О' => "O", 'о' => "o",
    'П' => "P", 'п' => "p",
    'Р' => "R", 'р' => "r",
    'С' => "S", 'с' => "s",
    'Т' => "T", 'т' => "t",
    'Ћ' => "Ć", 'ћ' => "ć",
    'У' => "U", 'у' => "u",
    'Ф' => "F", 'ф' => "f",
    'Х' => "H", 'х' => "h",
    'Ц' => "C", 'ц' => "c",
    'Ч' => "Č", 'ч' => "č",
    'Џ' => "Dž", 'џ' => "dž",
    'Ш' => "Š", 'ш' => "š",
};

/// Character-by-character transliteration. Anything outside the table,
/// including Latin text, passes through unchanged.
pub fn normalize(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for character in text.chars() {
        match CYRILLIC_TO_LATIN.get(&character) {
            Some(latin) => output.push_str(latin),
            None => output.push(character),
        }
    }
    output
}

pub fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(is_cyrillic)
}

pub fn is_cyrillic(character: char) -> bool {
    ('\u{0400}'..='\u{04FF}').contains(&character)
}
